// Owner-only files for secrets handed to git (SSH keys).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

const OWNER_ONLY_FILE: u32 = 0o600;
const OWNER_ONLY_DIR: u32 = 0o700;

pub fn ensure_owner_only_file(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_FILE)
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<()> {
    restrict_mode(path, OWNER_ONLY_DIR)
}

/// Tighten `path` to exactly `mode`. Missing paths are left alone; a no-op
/// off unix.
#[cfg(unix)]
fn restrict_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read metadata for `{}`", path.display()))
        }
    };
    if metadata.permissions().mode() & 0o777 != mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set mode {mode:o} on `{}`", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

pub fn open_private_truncate(path: &Path) -> std::io::Result<std::fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(OWNER_ONLY_FILE)
            .open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().create(true).write(true).truncate(true).open(path)
    }
}

/// Write `contents` to `path` readable only by the owner, creating an
/// owner-only parent directory when needed.
pub fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?;
        ensure_owner_only_dir(parent)?;
    }
    let mut file = open_private_truncate(path)
        .with_context(|| format!("failed to open `{}`", path.display()))?;
    file.write_all(contents).with_context(|| format!("failed to write `{}`", path.display()))?;
    // Pre-existing files keep their old mode through `open`.
    ensure_owner_only_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    #[test]
    fn owner_only_helpers_apply_expected_modes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().expect("tempdir should be created");
        let dir_path = tmp.path().join("private-dir");
        let file_path = dir_path.join("private.bin");

        fs::create_dir_all(&dir_path).expect("directory should be created");
        fs::write(&file_path, b"secret").expect("file should be created");

        fs::set_permissions(&dir_path, fs::Permissions::from_mode(0o755))
            .expect("directory permissions should be set");
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644))
            .expect("file permissions should be set");

        ensure_owner_only_dir(&dir_path).expect("directory mode should be tightened");
        ensure_owner_only_file(&file_path).expect("file mode should be tightened");

        let dir_mode =
            fs::metadata(&dir_path).expect("directory metadata should load").permissions().mode()
                & 0o777;
        let file_mode =
            fs::metadata(&file_path).expect("file metadata should load").permissions().mode()
                & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn write_private_file_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().expect("tempdir should be created");
        let path = tmp.path().join("keys").join("id_key");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_private_file(&path, b"new key").expect("write should succeed");

        assert_eq!(fs::read(&path).unwrap(), b"new key");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn missing_paths_are_ignored() {
        let tmp = tempdir().expect("tempdir should be created");
        ensure_owner_only_file(&tmp.path().join("absent")).expect("missing file is fine");
        ensure_owner_only_dir(&tmp.path().join("absent-dir")).expect("missing dir is fine");
    }
}

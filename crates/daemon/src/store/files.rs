// YAML record files relative to the working copy root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path};

use serde::de::DeserializeOwned;
use serde::Serialize;

use gitbroker_common::catalog::Catalog;
use gitbroker_common::path::layout::CATALOG_FILE;

use crate::store::error::StoreError;

/// Read and decode `root/relative`. A missing or empty file is `None`.
pub fn read_yaml<T: DeserializeOwned>(
    root: &Path,
    relative: &Path,
) -> Result<Option<T>, StoreError> {
    let path = root.join(relative);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(StoreError::Io { path, source }),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Malformed { path: relative.to_path_buf(), source })
}

/// Encode `value` into `root/relative`, creating parent directories.
pub fn write_yaml<T: Serialize>(root: &Path, relative: &Path, value: &T) -> Result<(), StoreError> {
    let encoded = serde_yaml::to_string(value)
        .map_err(|source| StoreError::Encode { path: relative.to_path_buf(), source })?;
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
    }
    fs::write(&path, encoded).map_err(|source| StoreError::Io { path, source })
}

pub fn load_catalog(root: &Path) -> Result<Catalog, StoreError> {
    let path = root.join(CATALOG_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(StoreError::CatalogMissing)
        }
        Err(source) => return Err(StoreError::Io { path, source }),
    };
    Ok(Catalog::parse(&contents)?)
}

/// Repository-relative path in the form git expects on every platform.
pub fn git_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitbroker_common::types::{OperationStatus, StatusState};
    use tempfile::tempdir;

    #[test]
    fn missing_and_empty_files_read_as_none() {
        let tmp = tempdir().unwrap();
        assert_eq!(read_yaml::<OperationStatus>(tmp.path(), Path::new("status.yml")).unwrap(), None);

        fs::write(tmp.path().join("status.yml"), "  \n").unwrap();
        assert_eq!(read_yaml::<OperationStatus>(tmp.path(), Path::new("status.yml")).unwrap(), None);
    }

    #[test]
    fn write_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let relative = Path::new("instances/a/status.yml");
        write_yaml(tmp.path(), relative, &OperationStatus::in_progress("working")).unwrap();

        let status: OperationStatus = read_yaml(tmp.path(), relative).unwrap().unwrap();
        assert_eq!(status.status, StatusState::InProgress);
        assert_eq!(status.description, "working");
    }

    #[test]
    fn malformed_yaml_is_reported_with_path() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("status.yml"), "status: [unterminated").unwrap();

        let error = read_yaml::<OperationStatus>(tmp.path(), Path::new("status.yml")).unwrap_err();
        assert!(matches!(
            error,
            StoreError::Malformed { ref path, .. } if path == Path::new("status.yml")
        ));
    }

    #[test]
    fn missing_catalog_is_distinct_error() {
        let tmp = tempdir().unwrap();
        assert!(matches!(load_catalog(tmp.path()), Err(StoreError::CatalogMissing)));
    }

    #[test]
    fn git_paths_use_forward_slashes() {
        let relative = Path::new("instances").join("a").join("bindings").join("b");
        assert_eq!(git_path(&relative), "instances/a/bindings/b");
    }
}

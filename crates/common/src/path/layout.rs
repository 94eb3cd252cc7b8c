// Repository file layout: where every record lives relative to the working copy root.
//
// catalog.yml
// instances/<instanceId>/instance.yml
// instances/<instanceId>/status.yml
// instances/<instanceId>/params.yml
// instances/<instanceId>/bindings/<bindingId>/binding.yml
// instances/<instanceId>/bindings/<bindingId>/status.yml
// instances/<instanceId>/bindings/<bindingId>/credentials.yml

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Maximum record id length in bytes (a single filesystem path component).
const MAX_ID_BYTES: usize = 255;

pub const CATALOG_FILE: &str = "catalog.yml";
pub const INSTANCES_DIR: &str = "instances";
pub const BINDINGS_DIR: &str = "bindings";
pub const INSTANCE_FILE: &str = "instance.yml";
pub const BINDING_FILE: &str = "binding.yml";
pub const STATUS_FILE: &str = "status.yml";
pub const PARAMS_FILE: &str = "params.yml";
pub const CREDENTIALS_FILE: &str = "credentials.yml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("record id is empty")]
    Empty,

    #[error("record id exceeds maximum length of {MAX_ID_BYTES} bytes")]
    TooLong,

    #[error("record id is a directory traversal component: {0}")]
    Traversal(String),

    #[error("record id contains a path separator: {0}")]
    Separator(String),

    #[error("record id contains null byte")]
    NullByte,

    #[error("record id is whitespace only")]
    Whitespace,
}

/// Check that a service instance or binding id can be used as a single path component.
///
/// Ids come straight from the OSB request path, so anything that could escape
/// `instances/` is rejected instead of normalized.
pub fn validate_record_id(id: &str) -> Result<(), LayoutError> {
    if id.is_empty() {
        return Err(LayoutError::Empty);
    }
    if id.contains('\0') {
        return Err(LayoutError::NullByte);
    }
    if id.contains('/') || id.contains('\\') {
        return Err(LayoutError::Separator(id.to_string()));
    }
    if id == "." || id == ".." {
        return Err(LayoutError::Traversal(id.to_string()));
    }
    if id.trim().is_empty() {
        return Err(LayoutError::Whitespace);
    }
    if id.len() > MAX_ID_BYTES {
        return Err(LayoutError::TooLong);
    }
    Ok(())
}

/// Relative paths of a service instance's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    dir: PathBuf,
}

impl InstancePaths {
    pub fn new(instance_id: &str) -> Result<Self, LayoutError> {
        validate_record_id(instance_id)?;
        Ok(Self { dir: Path::new(INSTANCES_DIR).join(instance_id) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn instance(&self) -> PathBuf {
        self.dir.join(INSTANCE_FILE)
    }

    pub fn status(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn params(&self) -> PathBuf {
        self.dir.join(PARAMS_FILE)
    }

    pub fn binding(&self, binding_id: &str) -> Result<BindingPaths, LayoutError> {
        validate_record_id(binding_id)?;
        Ok(BindingPaths { dir: self.dir.join(BINDINGS_DIR).join(binding_id) })
    }
}

/// Relative paths of a service binding's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPaths {
    dir: PathBuf,
}

impl BindingPaths {
    pub fn new(instance_id: &str, binding_id: &str) -> Result<Self, LayoutError> {
        InstancePaths::new(instance_id)?.binding(binding_id)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn binding(&self) -> PathBuf {
        self.dir.join(BINDING_FILE)
    }

    pub fn status(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn credentials(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_paths_follow_layout() {
        let paths = InstancePaths::new("i-123").unwrap();
        assert_eq!(paths.instance(), PathBuf::from("instances/i-123/instance.yml"));
        assert_eq!(paths.status(), PathBuf::from("instances/i-123/status.yml"));
        assert_eq!(paths.params(), PathBuf::from("instances/i-123/params.yml"));
    }

    #[test]
    fn binding_paths_nest_under_instance() {
        let paths = BindingPaths::new("i-123", "b-9").unwrap();
        assert_eq!(paths.binding(), PathBuf::from("instances/i-123/bindings/b-9/binding.yml"));
        assert_eq!(paths.status(), PathBuf::from("instances/i-123/bindings/b-9/status.yml"));
        assert_eq!(
            paths.credentials(),
            PathBuf::from("instances/i-123/bindings/b-9/credentials.yml")
        );
    }

    #[test]
    fn accepts_uuid_ids() {
        assert!(validate_record_id("8d2b1c6e-4f5a-4b8e-9c1d-2e3f4a5b6c7d").is_ok());
    }

    #[test]
    fn rejects_traversal() {
        assert_eq!(validate_record_id(".."), Err(LayoutError::Traversal("..".into())));
        assert_eq!(validate_record_id("."), Err(LayoutError::Traversal(".".into())));
    }

    #[test]
    fn rejects_separators() {
        assert_eq!(
            validate_record_id("../etc"),
            Err(LayoutError::Separator("../etc".into()))
        );
        assert_eq!(validate_record_id("a\\b"), Err(LayoutError::Separator("a\\b".into())));
    }

    #[test]
    fn rejects_empty_whitespace_and_nul() {
        assert_eq!(validate_record_id(""), Err(LayoutError::Empty));
        assert_eq!(validate_record_id("   "), Err(LayoutError::Whitespace));
        assert_eq!(validate_record_id("a\0b"), Err(LayoutError::NullByte));
    }

    #[test]
    fn enforces_max_length() {
        assert!(validate_record_id(&"a".repeat(255)).is_ok());
        assert_eq!(validate_record_id(&"a".repeat(256)), Err(LayoutError::TooLong));
    }

    #[test]
    fn binding_rejects_invalid_binding_id() {
        let paths = InstancePaths::new("i-1").unwrap();
        assert_eq!(paths.binding(""), Err(LayoutError::Empty));
    }
}

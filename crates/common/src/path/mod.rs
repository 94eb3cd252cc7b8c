pub mod layout;

pub use layout::{validate_record_id, BindingPaths, InstancePaths, LayoutError};

use std::path::PathBuf;

use gitbroker_common::catalog::CatalogError;
use gitbroker_common::path::LayoutError;
use thiserror::Error;

use crate::git::worker::GitWorkerError;
use crate::store::controller::SlotError;

/// Failures of a domain read or mutation. Each variant maps to one
/// distinct response of the request layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid record id: {0}")]
    InvalidId(#[from] LayoutError),

    #[error("service instance `{0}` does not exist")]
    InstanceNotFound(String),

    #[error("service instance `{0}` already exists")]
    InstanceExists(String),

    #[error("service instance `{0}` has been deleted")]
    InstanceGone(String),

    #[error("service binding `{0}` does not exist")]
    BindingNotFound(String),

    #[error("service binding `{0}` already exists")]
    BindingExists(String),

    #[error("service binding `{0}` has been deleted")]
    BindingGone(String),

    #[error("plan `{plan_id}` of service `{service_id}` is not in the catalog")]
    PlanNotFound { service_id: String, plan_id: String },

    #[error("plan `{plan_id}` of service `{service_id}` is not bindable")]
    NotBindable { service_id: String, plan_id: String },

    #[error("catalog.yml is missing from the repository")]
    CatalogMissing,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("`{path}` is not valid YAML: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to encode `{path}`: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to access `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("git operation failed: {0}")]
    Git(#[from] GitWorkerError),
}

impl StoreError {
    /// Errors caused by the request rather than by the repository.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidId(_)
                | StoreError::InstanceNotFound(_)
                | StoreError::InstanceExists(_)
                | StoreError::InstanceGone(_)
                | StoreError::BindingNotFound(_)
                | StoreError::BindingExists(_)
                | StoreError::BindingGone(_)
                | StoreError::PlanNotFound { .. }
                | StoreError::NotBindable { .. }
        )
    }
}

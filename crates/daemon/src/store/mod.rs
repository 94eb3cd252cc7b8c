// Record storage on top of the git working copy.

pub mod bindings;
pub mod controller;
pub mod error;
pub mod files;
pub mod instances;
pub mod repository;

pub use bindings::BindingRepository;
pub use controller::{ConcurrencyController, SlotError};
pub use error::StoreError;
pub use instances::InstanceRepository;
pub use repository::{GitRepository, MutationScope};

// Service binding persistence under `instances/<id>/bindings/<bindingId>/`.

use std::sync::Arc;

use tracing::info;

use gitbroker_common::path::{BindingPaths, InstancePaths};
use gitbroker_common::types::{BindingCredentials, OperationStatus, ServiceBinding};

use crate::git::worker::{CommandExecutor, ProcessCommandExecutor};
use crate::store::error::StoreError;
use crate::store::files::{load_catalog, read_yaml};
use crate::store::instances::live_instance;
use crate::store::repository::GitRepository;

const UNBINDING_DESCRIPTION: &str = "deprovisioning service binding";

pub struct BindingRepository<E = ProcessCommandExecutor> {
    repo: Arc<GitRepository<E>>,
}

impl<E> Clone for BindingRepository<E> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

impl<E: CommandExecutor> BindingRepository<E> {
    pub fn new(repo: Arc<GitRepository<E>>) -> Self {
        Self { repo }
    }

    /// Persist a binding of a live instance to a bindable plan.
    pub fn create(&self, binding: ServiceBinding) -> Result<ServiceBinding, StoreError> {
        let instance_paths = InstancePaths::new(&binding.service_instance_id)?;
        let paths = instance_paths.binding(&binding.binding_id)?;
        let id = binding.binding_id.clone();

        let created = self.repo.mutate(|scope| {
            let root = scope.root();
            live_instance(root, &instance_paths, &binding.service_instance_id)?;

            let catalog = load_catalog(root)?;
            let (service, _) = catalog
                .plan(&binding.service_definition_id, &binding.plan_id)
                .ok_or_else(|| StoreError::PlanNotFound {
                    service_id: binding.service_definition_id.clone(),
                    plan_id: binding.plan_id.clone(),
                })?;
            if !service.is_bindable(&binding.plan_id) {
                return Err(StoreError::NotBindable {
                    service_id: binding.service_definition_id.clone(),
                    plan_id: binding.plan_id.clone(),
                });
            }
            match read_yaml::<ServiceBinding>(root, &paths.binding())? {
                Some(existing) if existing.deleted => {
                    return Err(StoreError::BindingGone(id.clone()))
                }
                Some(_) => return Err(StoreError::BindingExists(id.clone())),
                None => {}
            }

            scope.write(&paths.binding(), &binding)?;
            scope.commit(&[paths.dir()], &format!("Created Service binding {id}"))?;
            Ok(binding)
        })?;

        info!(
            instance_id = %created.service_instance_id,
            binding_id = %id,
            "service binding created"
        );
        Ok(created)
    }

    /// Mark the binding deleted. Returns `false` without committing when it
    /// was already marked.
    pub fn delete(&self, instance_id: &str, binding_id: &str) -> Result<bool, StoreError> {
        let paths = BindingPaths::new(instance_id, binding_id)?;

        let marked = self.repo.mutate(|scope| {
            let root = scope.root();
            let mut record = read_yaml::<ServiceBinding>(root, &paths.binding())?
                .ok_or_else(|| StoreError::BindingNotFound(binding_id.to_string()))?;
            if record.deleted {
                return Ok(false);
            }

            record.deleted = true;
            scope.write(&paths.binding(), &record)?;
            let status = OperationStatus::in_progress(UNBINDING_DESCRIPTION);
            scope.write(&paths.status(), &status)?;
            scope.commit(
                &[paths.dir()],
                &format!("Marked Service binding {binding_id} as deleted."),
            )
        })?;

        if marked {
            info!(instance_id, binding_id, "service binding marked as deleted");
        }
        Ok(marked)
    }

    pub fn get(&self, instance_id: &str, binding_id: &str) -> Result<ServiceBinding, StoreError> {
        let paths = BindingPaths::new(instance_id, binding_id)?;
        self.repo.read(|root| {
            read_yaml(root, &paths.binding())?
                .ok_or_else(|| StoreError::BindingNotFound(binding_id.to_string()))
        })
    }

    pub fn get_status(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<OperationStatus, StoreError> {
        let paths = BindingPaths::new(instance_id, binding_id)?;
        self.repo.read(|root| {
            if !root.join(paths.binding()).exists() {
                return Err(StoreError::BindingNotFound(binding_id.to_string()));
            }
            Ok(read_yaml(root, &paths.status())?.unwrap_or_else(OperationStatus::binding_default))
        })
    }

    /// Credentials written by the binding pipeline; empty until it runs.
    pub fn get_credentials(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<BindingCredentials, StoreError> {
        let paths = BindingPaths::new(instance_id, binding_id)?;
        self.repo.read(|root| {
            if !root.join(paths.binding()).exists() {
                return Err(StoreError::BindingNotFound(binding_id.to_string()));
            }
            Ok(read_yaml(root, &paths.credentials())?.unwrap_or_default())
        })
    }
}

// Service instance persistence under `instances/<id>/`.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use gitbroker_common::path::InstancePaths;
use gitbroker_common::types::{InstanceUpdate, OperationStatus, ServiceInstance};

use crate::git::worker::{CommandExecutor, ProcessCommandExecutor};
use crate::store::error::StoreError;
use crate::store::files::{load_catalog, read_yaml};
use crate::store::repository::GitRepository;

const DEPROVISIONING_DESCRIPTION: &str = "deprovisioning service instance";

pub struct InstanceRepository<E = ProcessCommandExecutor> {
    repo: Arc<GitRepository<E>>,
}

impl<E> Clone for InstanceRepository<E> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone() }
    }
}

impl<E: CommandExecutor> InstanceRepository<E> {
    pub fn new(repo: Arc<GitRepository<E>>) -> Self {
        Self { repo }
    }

    /// Persist a new instance after checking its plan against the catalog.
    /// The stored record carries a snapshot of the service definition.
    pub fn create(&self, instance: ServiceInstance) -> Result<ServiceInstance, StoreError> {
        let paths = InstancePaths::new(&instance.service_instance_id)?;
        let id = instance.service_instance_id.clone();

        let created = self.repo.mutate(|scope| {
            let root = scope.root();
            let catalog = load_catalog(root)?;
            let (service, _) = catalog
                .plan(&instance.service_definition_id, &instance.plan_id)
                .ok_or_else(|| StoreError::PlanNotFound {
                    service_id: instance.service_definition_id.clone(),
                    plan_id: instance.plan_id.clone(),
                })?;
            match read_yaml::<ServiceInstance>(root, &paths.instance())? {
                Some(existing) if existing.deleted => {
                    return Err(StoreError::InstanceGone(id.clone()))
                }
                Some(_) => return Err(StoreError::InstanceExists(id.clone())),
                None => {}
            }

            let mut record = instance;
            record.service_definition = Some(service.clone());
            scope.write(&paths.instance(), &record)?;
            scope.commit(&[paths.dir()], &format!("Created Service instance {id}"))?;
            Ok(record)
        })?;

        info!(instance_id = %id, plan_id = %created.plan_id, "service instance created");
        Ok(created)
    }

    pub fn update(
        &self,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<ServiceInstance, StoreError> {
        let paths = InstancePaths::new(instance_id)?;

        let updated = self.repo.mutate(|scope| {
            let root = scope.root();
            let mut record = live_instance(root, &paths, instance_id)?;
            if let Some(plan_id) = &update.plan_id {
                let catalog = load_catalog(root)?;
                let (service, _) =
                    catalog.plan(&record.service_definition_id, plan_id).ok_or_else(|| {
                        StoreError::PlanNotFound {
                            service_id: record.service_definition_id.clone(),
                            plan_id: plan_id.clone(),
                        }
                    })?;
                record.service_definition = Some(service.clone());
            }
            record.apply_update(update);
            scope.write(&paths.instance(), &record)?;
            scope.commit(&[paths.dir()], &format!("Updated Service instance {instance_id}"))?;
            Ok(record)
        })?;

        info!(instance_id, plan_id = %updated.plan_id, "service instance updated");
        Ok(updated)
    }

    /// Mark the instance deleted and its status in progress so the
    /// deprovisioning pipeline picks it up. Returns `false` without
    /// committing when it was already marked.
    pub fn delete(&self, instance_id: &str) -> Result<bool, StoreError> {
        let paths = InstancePaths::new(instance_id)?;

        let marked = self.repo.mutate(|scope| {
            let root = scope.root();
            let mut record = read_yaml::<ServiceInstance>(root, &paths.instance())?
                .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?;
            if record.deleted {
                return Ok(false);
            }

            record.deleted = true;
            scope.write(&paths.instance(), &record)?;
            let status = OperationStatus::in_progress(DEPROVISIONING_DESCRIPTION);
            scope.write(&paths.status(), &status)?;
            scope.commit(
                &[paths.dir()],
                &format!("Marked Service instance {instance_id} as deleted."),
            )
        })?;

        if marked {
            info!(instance_id, "service instance marked as deleted");
        }
        Ok(marked)
    }

    /// The stored record, including instances already marked deleted.
    pub fn get(&self, instance_id: &str) -> Result<ServiceInstance, StoreError> {
        let paths = InstancePaths::new(instance_id)?;
        self.repo.read(|root| {
            read_yaml(root, &paths.instance())?
                .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))
        })
    }

    /// Last operation status; an instance without `status.yml` is still
    /// being prepared.
    pub fn get_status(&self, instance_id: &str) -> Result<OperationStatus, StoreError> {
        let paths = InstancePaths::new(instance_id)?;
        self.repo.read(|root| {
            if !root.join(paths.instance()).exists() {
                return Err(StoreError::InstanceNotFound(instance_id.to_string()));
            }
            Ok(read_yaml(root, &paths.status())?.unwrap_or_else(OperationStatus::instance_default))
        })
    }

    /// Operator-supplied `params.yml`, if any. The broker never writes it.
    pub fn manual_parameters(&self, instance_id: &str) -> Result<Option<Value>, StoreError> {
        let paths = InstancePaths::new(instance_id)?;
        self.repo.read(|root| {
            if !root.join(paths.instance()).exists() {
                return Err(StoreError::InstanceNotFound(instance_id.to_string()));
            }
            read_yaml(root, &paths.params())
        })
    }
}

/// Load an instance that exists and is not marked deleted.
pub(crate) fn live_instance(
    root: &std::path::Path,
    paths: &InstancePaths,
    instance_id: &str,
) -> Result<ServiceInstance, StoreError> {
    let record = read_yaml::<ServiceInstance>(root, &paths.instance())?
        .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?;
    if record.deleted {
        return Err(StoreError::InstanceGone(instance_id.to_string()));
    }
    Ok(record)
}

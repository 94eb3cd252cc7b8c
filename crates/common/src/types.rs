// Core domain records persisted in the broker repository.
//
// Field names are camelCase on disk because the same files are read and
// written by CI pipelines that speak the OSB vocabulary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ServiceDefinition;

/// Description used when an instance has no `status.yml` yet.
pub const DEFAULT_INSTANCE_STATUS_DESCRIPTION: &str = "preparing service instance";
/// Description used when a binding has no `status.yml` yet.
pub const DEFAULT_BINDING_STATUS_DESCRIPTION: &str = "preparing service binding";

/// A provisioned (or being provisioned) service instance: `instance.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    /// Snapshot of the catalog entry at provisioning time, for pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_definition: Option<ServiceDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_identity: Option<Value>,
    #[serde(default)]
    pub async_accepted: bool,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default = "empty_object")]
    pub context: Value,
    #[serde(default)]
    pub deleted: bool,
}

impl ServiceInstance {
    pub fn new(
        service_instance_id: impl Into<String>,
        service_definition_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            service_instance_id: service_instance_id.into(),
            service_definition_id: service_definition_id.into(),
            plan_id: plan_id.into(),
            service_definition: None,
            originating_identity: None,
            async_accepted: true,
            parameters: empty_object(),
            context: empty_object(),
            deleted: false,
        }
    }

    /// Apply an OSB update request. Fields left as `None` keep their value.
    pub fn apply_update(&mut self, update: &InstanceUpdate) {
        if let Some(plan_id) = &update.plan_id {
            self.plan_id = plan_id.clone();
        }
        if let Some(parameters) = &update.parameters {
            self.parameters = parameters.clone();
        }
        if let Some(context) = &update.context {
            self.context = context.clone();
        }
    }
}

/// Changes requested by an OSB update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceUpdate {
    pub plan_id: Option<String>,
    pub parameters: Option<Value>,
    pub context: Option<Value>,
}

/// A service binding: `binding.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBinding {
    pub binding_id: String,
    pub service_instance_id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_identity: Option<Value>,
    #[serde(default)]
    pub async_accepted: bool,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default = "empty_object")]
    pub context: Value,
    #[serde(default)]
    pub deleted: bool,
}

impl ServiceBinding {
    pub fn new(
        binding_id: impl Into<String>,
        service_instance_id: impl Into<String>,
        service_definition_id: impl Into<String>,
        plan_id: impl Into<String>,
    ) -> Self {
        Self {
            binding_id: binding_id.into(),
            service_instance_id: service_instance_id.into(),
            service_definition_id: service_definition_id.into(),
            plan_id: plan_id.into(),
            bind_resource: None,
            originating_identity: None,
            async_accepted: true,
            parameters: empty_object(),
            context: empty_object(),
            deleted: false,
        }
    }
}

/// Last operation state as reported to the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

/// Contents of a `status.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationStatus {
    pub status: StatusState,
    #[serde(default)]
    pub description: String,
}

impl OperationStatus {
    pub fn in_progress(description: impl Into<String>) -> Self {
        Self { status: StatusState::InProgress, description: description.into() }
    }

    /// Implicit status of an instance whose pipeline has not reported yet.
    pub fn instance_default() -> Self {
        Self::in_progress(DEFAULT_INSTANCE_STATUS_DESCRIPTION)
    }

    /// Implicit status of a binding whose pipeline has not reported yet.
    pub fn binding_default() -> Self {
        Self::in_progress(DEFAULT_BINDING_STATUS_DESCRIPTION)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, StatusState::InProgress)
    }
}

/// Contents of a binding's `credentials.yml`; absent file means empty.
pub type BindingCredentials = BTreeMap<String, Value>;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

// Service catalog: `catalog.yml` at the repository root.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("catalog lists service `{0}` more than once")]
    DuplicateService(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Catalog {
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bindable: bool,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Plan-level override of the service's `bindable` flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
}

impl Catalog {
    pub fn parse(contents: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_yaml::from_str(contents)?;
        let mut seen = std::collections::HashSet::new();
        for service in &catalog.services {
            if !seen.insert(service.id.as_str()) {
                return Err(CatalogError::DuplicateService(service.id.clone()));
            }
        }
        Ok(catalog)
    }

    pub fn service(&self, service_id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|service| service.id == service_id)
    }

    /// Look up a plan by service and plan id.
    pub fn plan(&self, service_id: &str, plan_id: &str) -> Option<(&ServiceDefinition, &Plan)> {
        let service = self.service(service_id)?;
        let plan = service.plans.iter().find(|plan| plan.id == plan_id)?;
        Some((service, plan))
    }
}

impl ServiceDefinition {
    pub fn is_bindable(&self, plan_id: &str) -> bool {
        self.plans
            .iter()
            .find(|plan| plan.id == plan_id)
            .and_then(|plan| plan.bindable)
            .unwrap_or(self.bindable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
services:
  - id: svc-db
    name: database
    description: Managed database
    bindable: true
    plans:
      - id: plan-small
        name: small
      - id: plan-archive
        name: archive
        bindable: false
  - id: svc-dns
    name: dns
    plans:
      - id: plan-zone
        name: zone
"#;

    #[test]
    fn finds_plan_by_service_and_plan_id() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let (service, plan) = catalog.plan("svc-db", "plan-small").unwrap();
        assert_eq!(service.name, "database");
        assert_eq!(plan.name, "small");
    }

    #[test]
    fn plan_lookup_is_scoped_to_its_service() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        assert!(catalog.plan("svc-dns", "plan-small").is_none());
        assert!(catalog.plan("svc-missing", "plan-small").is_none());
    }

    #[test]
    fn plan_bindable_overrides_service() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let db = catalog.service("svc-db").unwrap();
        assert!(db.is_bindable("plan-small"));
        assert!(!db.is_bindable("plan-archive"));
        assert!(!catalog.service("svc-dns").unwrap().is_bindable("plan-zone"));
    }

    #[test]
    fn rejects_duplicate_services() {
        let yaml = "services:\n  - {id: a, name: a}\n  - {id: a, name: b}\n";
        assert!(matches!(
            Catalog::parse(yaml),
            Err(CatalogError::DuplicateService(id)) if id == "a"
        ));
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(Catalog::parse("services: [\n"), Err(CatalogError::Parse(_))));
    }
}

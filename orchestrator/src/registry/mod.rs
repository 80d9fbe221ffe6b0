//! Service registry
//!
//! Single source of truth for which services exist, how they are obtained,
//! and in which order they start. Validated once at construction; immutable
//! afterwards.

pub mod catalog;
pub mod descriptor;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::registry::descriptor::{
    DeployTier, PerformanceThreshold, ServiceDescriptor, ServiceGroup,
};

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
    index: HashMap<String, usize>,
    /// Indices into `services` in global dependency order
    order: Vec<usize>,
}

impl ServiceRegistry {
    /// Build a registry, rejecting duplicates, unknown dependencies, cycles and
    /// health paths without a port
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self, OrchestratorError> {
        let mut index = HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            if index.insert(service.name.clone(), i).is_some() {
                return Err(OrchestratorError::RegistryError(format!(
                    "duplicate service name: {}",
                    service.name
                )));
            }
        }

        for service in &services {
            for dep in &service.depends_on {
                if !index.contains_key(dep) {
                    return Err(OrchestratorError::RegistryError(format!(
                        "{} depends on unknown service {}",
                        service.name, dep
                    )));
                }
                if dep == &service.name {
                    return Err(OrchestratorError::RegistryError(format!(
                        "{} depends on itself",
                        service.name
                    )));
                }
            }
            if service.health_path.is_some() && service.probe_port().is_none() {
                return Err(OrchestratorError::RegistryError(format!(
                    "{} declares a health path but no port",
                    service.name
                )));
            }
        }

        let order = topological_order(&services, &index)?;
        Ok(Self {
            services,
            index,
            order,
        })
    }

    /// The default Spatial Platform catalog
    pub fn spatial_platform() -> Result<Self, OrchestratorError> {
        Self::new(catalog::spatial_platform())
    }

    /// Registry from `file` when present, else the default catalog
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        if !file.exists().await {
            debug!("No registry file, using the default catalog");
            return Self::spatial_platform();
        }
        let document = file.read_json::<RegistryDocument>().await.map_err(|e| {
            OrchestratorError::RegistryError(format!(
                "invalid registry file {}: {}",
                file.path().display(),
                e
            ))
        })?;
        info!(
            path = %file.path().display(),
            services = document.services.len(),
            "Loaded service registry"
        );
        Self::new(document.services)
    }

    pub fn describe(&self, name: &str) -> Result<&ServiceDescriptor, OrchestratorError> {
        self.index
            .get(name)
            .map(|i| &self.services[*i])
            .ok_or_else(|| OrchestratorError::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in `group`, declaration order
    pub fn members(&self, group: ServiceGroup) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.group == group)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Direct dependencies of `name`
    pub fn dependencies(&self, name: &str) -> Result<BTreeSet<String>, OrchestratorError> {
        Ok(self.describe(name)?.depends_on.iter().cloned().collect())
    }

    pub fn all(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn tier(&self, tier: DeployTier) -> Vec<&ServiceDescriptor> {
        self.services.iter().filter(|s| s.tier == tier).collect()
    }

    /// Services flagged critical
    pub fn critical(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.critical)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Services whose image comes from a local build
    pub fn build_required(&self) -> Vec<&ServiceDescriptor> {
        self.services.iter().filter(|s| s.requires_build()).collect()
    }

    /// Services running a pre-built image that no registered build produces
    pub fn prebuilt(&self) -> Vec<&ServiceDescriptor> {
        let built: BTreeSet<String> = self.build_required().iter().map(|s| s.image_ref()).collect();
        self.services
            .iter()
            .filter(|s| !s.requires_build() && s.image.is_some())
            .filter(|s| !built.contains(&s.image_ref()))
            .collect()
    }

    /// Every credential variable any service requires, sorted and deduplicated
    pub fn credential_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .services
            .iter()
            .flat_map(|s| s.credentials.iter())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Dependency-ordered batches of a tier's services.
    ///
    /// Services in one batch may start in parallel; each batch depends only on
    /// earlier ones. Declaration order is kept inside a batch. Dependencies on
    /// other tiers are satisfied by phase order and ignored here.
    pub fn deploy_levels(&self, tier: DeployTier) -> Vec<Vec<String>> {
        let mut level: HashMap<usize, usize> = HashMap::new();
        for &i in &self.order {
            let service = &self.services[i];
            if service.tier != tier {
                continue;
            }
            let depth = service
                .depends_on
                .iter()
                .filter_map(|dep| self.index.get(dep))
                .filter(|d| self.services[**d].tier == tier)
                .filter_map(|d| level.get(d))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(i, depth);
        }

        let depth = level.values().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut batches: Vec<Vec<String>> = vec![Vec::new(); depth];
        for (i, service) in self.services.iter().enumerate() {
            if let Some(l) = level.get(&i) {
                batches[*l].push(service.name.clone());
            }
        }
        batches
    }

    /// `names` sorted into global dependency order; unknown names are dropped
    pub fn dependency_order(&self, names: &[String]) -> Vec<String> {
        self.order
            .iter()
            .map(|i| &self.services[*i].name)
            .filter(|n| names.contains(n))
            .cloned()
            .collect()
    }

    /// Every declared performance threshold
    pub fn thresholds(&self) -> Vec<PerformanceThreshold> {
        self.services
            .iter()
            .filter_map(|s| {
                let path = s.health_path.as_ref()?;
                let port = s.probe_port()?;
                Some(PerformanceThreshold {
                    internal: s.internal,
                    ..PerformanceThreshold::new(&s.name, port, path, s.max_latency_ms)
                })
            })
            .collect()
    }
}

/// Kahn's algorithm, picking the earliest-declared ready service each step
fn topological_order(
    services: &[ServiceDescriptor],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, OrchestratorError> {
    let mut remaining: Vec<usize> = services.iter().map(|s| s.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); services.len()];
    for (i, service) in services.iter().enumerate() {
        for dep in &service.depends_on {
            if let Some(d) = index.get(dep) {
                dependents[*d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..services.len()).filter(|i| remaining[*i] == 0).collect();
    let mut order = Vec::with_capacity(services.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in &dependents[next] {
            remaining[*dependent] -= 1;
            if remaining[*dependent] == 0 {
                ready.insert(*dependent);
            }
        }
    }

    if order.len() != services.len() {
        let cyclic: Vec<&str> = (0..services.len())
            .filter(|i| remaining[*i] > 0)
            .map(|i| services[i].name.as_str())
            .collect();
        return Err(OrchestratorError::RegistryError(format!(
            "dependency cycle among: {}",
            cyclic.join(", ")
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::descriptor::BuildWeight;

    fn svc(name: &str, tier: DeployTier, deps: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor::new(name, ServiceGroup::External, tier, BuildWeight::Light).depends_on(deps)
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let registry = ServiceRegistry::spatial_platform().unwrap();
        assert_eq!(registry.all().len(), 14);
        assert!(registry.contains("api-gateway"));
        assert_eq!(
            registry.deploy_levels(DeployTier::Core),
            vec![
                vec!["postgres".to_string(), "redis".to_string(), "minio".to_string()],
                vec!["nakama".to_string()],
            ]
        );
        assert!(registry
            .credential_names()
            .contains(&"POSTGRES_PASSWORD".to_string()));
    }

    #[test]
    fn test_gateway_threshold_declared() {
        let registry = ServiceRegistry::spatial_platform().unwrap();
        let gateway = registry
            .thresholds()
            .into_iter()
            .find(|t| t.service == "api-gateway")
            .unwrap();
        assert_eq!(gateway, PerformanceThreshold::new("api-gateway", 8000, "/healthz", 100));

        let internal = registry
            .thresholds()
            .into_iter()
            .find(|t| t.service == "vps-engine")
            .unwrap();
        assert!(internal.internal);
        assert_eq!(internal.port, 8080);
    }

    #[test]
    fn test_prebuilt_excludes_locally_built_images() {
        let registry = ServiceRegistry::spatial_platform().unwrap();
        let prebuilt: Vec<&str> = registry.prebuilt().iter().map(|s| s.name.as_str()).collect();
        assert!(prebuilt.contains(&"postgres"));
        assert!(prebuilt.contains(&"nakama"));
        assert!(!prebuilt.contains(&"mapping-worker"));
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::spatial_platform().unwrap();
        assert!(matches!(
            registry.describe("does-not-exist"),
            Err(OrchestratorError::UnknownService(_))
        ));
        assert!(registry.dependencies("does-not-exist").is_err());
    }

    #[test]
    fn test_levels_batch_parallel_eligible_services() {
        let registry = ServiceRegistry::new(vec![
            svc("store", DeployTier::Core, &[]),
            svc("cache", DeployTier::Core, &[]),
            svc("app", DeployTier::Core, &["store", "cache"]),
        ])
        .unwrap();

        assert_eq!(
            registry.deploy_levels(DeployTier::Core),
            vec![
                vec!["store".to_string(), "cache".to_string()],
                vec!["app".to_string()]
            ]
        );
        assert!(registry.deploy_levels(DeployTier::Monitoring).is_empty());
    }

    #[test]
    fn test_cross_tier_dependencies_do_not_deepen_levels() {
        let registry = ServiceRegistry::new(vec![
            svc("store", DeployTier::Core, &[]),
            svc("app", DeployTier::App, &["store"]),
            svc("worker", DeployTier::App, &["store"]),
        ])
        .unwrap();
        assert_eq!(
            registry.deploy_levels(DeployTier::App),
            vec![vec!["app".to_string(), "worker".to_string()]]
        );
    }

    #[test]
    fn test_dependency_order_respects_edges() {
        let registry = ServiceRegistry::new(vec![
            svc("app", DeployTier::App, &["store"]),
            svc("store", DeployTier::Core, &[]),
        ])
        .unwrap();
        assert_eq!(
            registry.dependency_order(&["app".to_string(), "store".to_string()]),
            vec!["store".to_string(), "app".to_string()]
        );
    }

    #[test]
    fn test_invalid_registries_are_rejected() {
        let duplicate = ServiceRegistry::new(vec![
            svc("a", DeployTier::Core, &[]),
            svc("a", DeployTier::Core, &[]),
        ]);
        assert!(matches!(duplicate, Err(OrchestratorError::RegistryError(_))));

        let unknown = ServiceRegistry::new(vec![svc("a", DeployTier::Core, &["ghost"])]);
        assert!(unknown.is_err());

        let cycle = ServiceRegistry::new(vec![
            svc("a", DeployTier::Core, &["b"]),
            svc("b", DeployTier::Core, &["a"]),
        ]);
        let err = cycle.unwrap_err().to_string();
        assert!(err.contains("cycle"), "{}", err);

        let portless = ServiceRegistry::new(vec![svc("a", DeployTier::Core, &[]).health("/health", 100)]);
        assert!(portless.is_err());
    }

    #[tokio::test]
    async fn test_registry_file_overrides_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        std::fs::write(
            &path,
            r#"{"services": [
                {"name": "store", "group": "external", "tier": "core", "weight": "minimal", "image": "postgres"},
                {"name": "app", "group": "light-build", "tier": "app", "weight": "medium",
                 "port": 8000, "health_path": "/healthz", "max_latency_ms": 100,
                 "build_context": "app", "depends_on": ["store"]}
            ]}"#,
        )
        .unwrap();

        let registry = ServiceRegistry::load(&File::new(&path)).await.unwrap();
        assert_eq!(registry.names(), vec!["store".to_string(), "app".to_string()]);
        assert_eq!(registry.build_required().len(), 1);

        let missing = ServiceRegistry::load(&File::new(dir.path().join("none.json")))
            .await
            .unwrap();
        assert_eq!(missing.all().len(), 14);
    }
}

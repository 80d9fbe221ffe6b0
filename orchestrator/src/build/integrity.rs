//! Image integrity verification

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::build::cache::BuildCache;
use crate::build::ImageBuilder;
use crate::errors::OrchestratorError;
use crate::registry::descriptor::ServiceDescriptor;
use crate::registry::ServiceRegistry;
use crate::runtime::ContainerEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub service: String,
    pub image: String,
    pub local_digest: Option<String>,
    /// Digest recorded by the last build, for locally built services
    pub cached_digest: Option<String>,
    pub container_image_id: Option<String>,
    pub running: bool,
    pub issues: Vec<String>,
}

impl IntegrityCheck {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct IntegrityVerifier<'a> {
    pub builder: &'a dyn ImageBuilder,
    pub engine: &'a dyn ContainerEngine,
    pub cache: &'a BuildCache,
    pub architecture: &'a str,
}

impl IntegrityVerifier<'_> {
    /// Verify one service, or every service when `service` is `None`
    pub async fn verify(
        &self,
        registry: &ServiceRegistry,
        service: Option<&str>,
    ) -> Result<Vec<IntegrityCheck>, OrchestratorError> {
        let targets: Vec<&ServiceDescriptor> = match service {
            Some(name) => vec![registry.describe(name)?],
            None => registry.all().iter().collect(),
        };

        let mut checks = Vec::with_capacity(targets.len());
        for target in targets {
            checks.push(self.verify_one(target).await?);
        }

        let failed = checks.iter().filter(|c| !c.passed()).count();
        if failed > 0 {
            warn!(checked = checks.len(), failed, "Image integrity issues found");
        } else {
            info!(checked = checks.len(), "Image integrity verified");
        }
        Ok(checks)
    }

    async fn verify_one(
        &self,
        service: &ServiceDescriptor,
    ) -> Result<IntegrityCheck, OrchestratorError> {
        let image = service.image_ref();
        let local_digest = self.builder.local_digest(&image).await?;
        let cached_digest = service
            .requires_build()
            .then(|| self.cache.get(&service.name, self.architecture))
            .flatten()
            .map(|entry| entry.digest);
        let state = self.engine.inspect(&service.name).await?;

        let mut issues = Vec::new();
        match &local_digest {
            None => issues.push(format!("image {} is not in the local store", image)),
            Some(local) => {
                if let Some(cached) = &cached_digest {
                    if cached != local {
                        issues.push(format!(
                            "local image {} differs from last recorded build {}",
                            local, cached
                        ));
                    }
                }
                if let Some(container_image) = state.image_id.as_ref().filter(|_| state.running) {
                    if container_image != local {
                        issues.push(format!(
                            "running container uses {} instead of {}",
                            container_image, local
                        ));
                    }
                }
            }
        }
        if service.requires_build() && cached_digest.is_none() {
            issues.push("no build recorded for this architecture".to_string());
        }

        Ok(IntegrityCheck {
            service: service.name.clone(),
            image,
            local_digest,
            cached_digest,
            container_image_id: state.image_id,
            running: state.running,
            issues,
        })
    }
}

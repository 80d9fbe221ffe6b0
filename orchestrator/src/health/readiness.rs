//! Post-start readiness checks

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::health::probe::{ProbeTarget, Prober};
use crate::health::retry::RetryPolicy;
use crate::registry::descriptor::{Readiness, ServiceDescriptor};
use crate::runtime::ContainerEngine;

pub struct ReadinessChecker {
    engine: Arc<dyn ContainerEngine>,
    prober: Arc<dyn Prober>,
}

impl ReadinessChecker {
    pub fn new(engine: Arc<dyn ContainerEngine>, prober: Arc<dyn Prober>) -> Self {
        Self { engine, prober }
    }

    /// A single readiness check according to the service's readiness kind
    pub async fn check(&self, service: &ServiceDescriptor) -> Result<(), OrchestratorError> {
        if !self.engine.is_running(&service.name).await? {
            return Err(OrchestratorError::DeployError(format!(
                "{} is not running",
                service.name
            )));
        }

        match &service.readiness {
            Readiness::Running => Ok(()),
            Readiness::Command { command } => {
                let output = self.engine.exec(&service.name, command).await?;
                if output.success() {
                    Ok(())
                } else {
                    Err(OrchestratorError::DeployError(format!(
                        "{} readiness command exited {}",
                        service.name, output.exit_code
                    )))
                }
            }
            Readiness::Http => {
                let (Some(port), Some(path)) = (service.probe_port(), service.health_path.as_ref())
                else {
                    return Ok(());
                };
                let target = ProbeTarget {
                    service: service.name.clone(),
                    port,
                    path: path.clone(),
                    internal: service.internal,
                };
                let result = self.prober.probe(&target).await;
                if result.success {
                    Ok(())
                } else {
                    Err(OrchestratorError::DeployError(format!(
                        "{} health endpoint not ready: {}",
                        service.name,
                        result.error.unwrap_or_else(|| "no response".to_string())
                    )))
                }
            }
        }
    }

    /// Poll [`Self::check`] under `policy`; the number of attempts used on success
    pub async fn wait_ready(
        &self,
        service: &ServiceDescriptor,
        policy: &RetryPolicy,
    ) -> Result<u32, OrchestratorError> {
        let result = policy
            .run(&service.name, |attempt| async move {
                self.check(service).await.map(|_| attempt)
            })
            .await;

        match &result {
            Ok(attempts) => info!(service = %service.name, attempts, "Service ready"),
            Err(e) => warn!(service = %service.name, "Service never became ready: {}", e),
        }
        result
    }
}

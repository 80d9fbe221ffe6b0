//! Container engine collaborator
//!
//! Every interaction with running services goes through [`ContainerEngine`].
//! The production implementation shells out to the Docker CLI; tests supply
//! in-memory fakes.

pub mod docker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Observed state of one service's container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    pub service: String,
    pub container_id: Option<String>,
    /// Image reference the container was created from
    pub image: Option<String>,
    /// Local image id (digest) backing the container
    pub image_id: Option<String>,
    pub running: bool,
    pub status: String,
    pub started_at: Option<String>,
}

impl ContainerState {
    /// State of a service with no container at all
    pub fn absent(service: &str) -> Self {
        Self {
            service: service.to_string(),
            container_id: None,
            image: None,
            image_id: None,
            running: false,
            status: "absent".to_string(),
            started_at: None,
        }
    }
}

/// Result of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One resource usage reading for a container
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Start/stop/inspect/exec on the platform's services
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Names of services with a running container
    async fn running_services(&self) -> Result<Vec<String>, OrchestratorError>;

    /// Create (if needed) and start a service without touching its dependencies
    async fn start(&self, service: &str) -> Result<(), OrchestratorError>;

    /// Gracefully stop a service
    async fn stop(&self, service: &str) -> Result<(), OrchestratorError>;

    async fn restart(&self, service: &str) -> Result<(), OrchestratorError>;

    /// Run `command` inside the service's container
    async fn exec(&self, service: &str, command: &[String])
        -> Result<ExecOutput, OrchestratorError>;

    /// Container state; [`ContainerState::absent`] when no container exists
    async fn inspect(&self, service: &str) -> Result<ContainerState, OrchestratorError>;

    /// Current CPU and memory usage of the service's container
    async fn stats(&self, service: &str) -> Result<ResourceSample, OrchestratorError>;

    async fn is_running(&self, service: &str) -> Result<bool, OrchestratorError> {
        Ok(self.inspect(service).await?.running)
    }
}

//! Error types for the deployment orchestrator

use thiserror::Error;

use crate::deploy::phase::Phase;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Another orchestrator run is active: {0}")]
    Locked(String),

    #[error("Container engine error: {0}")]
    EngineError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Compliance error: {0}")]
    ComplianceError(String),

    #[error("Rollback error: {0}")]
    RollbackError(String),

    #[error("Rollback point not found: {0}")]
    RollbackNotFound(String),

    #[error("Rollback cancelled by operator")]
    RollbackCancelled,

    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: Phase, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl OrchestratorError {
    /// Configuration problems abort a run before any side effect
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ConfigError(_)
                | OrchestratorError::RegistryError(_)
                | OrchestratorError::UnknownService(_)
        )
    }
}

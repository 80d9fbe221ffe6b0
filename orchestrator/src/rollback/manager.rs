//! Rollback manager

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::health::readiness::ReadinessChecker;
use crate::health::retry::RetryPolicy;
use crate::registry::ServiceRegistry;
use crate::rollback::snapshot::{
    capture_config, restore_config, PointDir, RollbackMetadata, RollbackSummary,
    RollbackTargets, StateSnapshot,
};
use crate::rollback::Confirmation;
use crate::runtime::{ContainerEngine, ContainerState};
use crate::storage::audit::AuditTrail;
use crate::utils::time_based_id;

pub const SAFETY_BACKUP_DESCRIPTION: &str = "pre-rollback safety backup";

/// Rollback manager options
#[derive(Debug, Clone)]
pub struct Options {
    /// Root the snapshot paths are relative to
    pub project_root: PathBuf,

    /// Configuration captured by each point
    pub snapshot_paths: Vec<PathBuf>,

    /// Readiness polling for the post-restore validation
    pub revalidation: RetryPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            snapshot_paths: vec![PathBuf::from("docker-compose.yml"), PathBuf::from(".env")],
            revalidation: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStatus {
    /// Restored, restarted, every critical service ready
    Full,
    /// Restored and restarted, some critical services not ready
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub id: String,
    pub safety_backup_id: String,
    pub status: RollbackStatus,
    pub stopped: Vec<String>,
    pub restored_files: usize,
    pub restarted: Vec<String>,
    pub failed_restarts: Vec<String>,
    pub unhealthy_critical: Vec<String>,
    pub message: String,
}

pub struct RollbackManager {
    dir: Dir,
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<ServiceRegistry>,
    readiness: Arc<ReadinessChecker>,
    confirmation: Arc<dyn Confirmation>,
    audit: Option<Arc<AuditTrail>>,
    options: Options,
}

impl RollbackManager {
    pub fn new(
        dir: Dir,
        engine: Arc<dyn ContainerEngine>,
        registry: Arc<ServiceRegistry>,
        readiness: Arc<ReadinessChecker>,
        confirmation: Arc<dyn Confirmation>,
        options: Options,
    ) -> Self {
        Self {
            dir,
            engine,
            registry,
            readiness,
            confirmation,
            audit: None,
            options,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record<T: Serialize>(&self, kind: &str, payload: &T) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(kind, payload) {
                warn!("Failed to write audit entry: {}", e);
            }
        }
    }

    fn target_services(&self, targets: &RollbackTargets) -> Vec<String> {
        match targets {
            RollbackTargets::All => self.registry.names(),
            RollbackTargets::Services(services) => self.registry.dependency_order(services),
        }
    }

    /// Snapshot configuration and observed state of `targets`.
    ///
    /// Only needs writable storage; state that cannot be observed is recorded
    /// as absent rather than waited on.
    pub async fn create_point(
        &self,
        description: &str,
        targets: RollbackTargets,
    ) -> Result<String, OrchestratorError> {
        if let RollbackTargets::Services(services) = &targets {
            for service in services {
                self.registry.describe(service)?;
            }
        }

        let created_at = Utc::now();
        let id = time_based_id("rb", created_at);
        let point = PointDir::new(self.dir.subdir(&id));

        let files = capture_config(
            &self.options.project_root,
            &self.options.snapshot_paths,
            &point.config_dir(),
        )
        .await?;

        let mut containers = Vec::new();
        for service in self.target_services(&targets) {
            let state = match self.engine.inspect(&service).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(service = %service, "Could not inspect service for snapshot: {}", e);
                    ContainerState::absent(&service)
                }
            };
            containers.push(state);
        }

        point
            .state_file()
            .write_json(&StateSnapshot {
                captured_at: created_at,
                containers,
            })
            .await?;

        let metadata = RollbackMetadata {
            id: id.clone(),
            description: description.to_string(),
            targets,
            created_at,
            files,
        };
        // metadata last: a point without it is incomplete and not listed
        point.metadata_file().write_json(&metadata).await?;

        info!(id = %id, description, files = metadata.files.len(), "Rollback point created");
        self.record("rollback_point_created", &RollbackSummary::from(&metadata));
        Ok(id)
    }

    /// Every complete rollback point, oldest first
    pub async fn list(&self) -> Result<Vec<RollbackSummary>, OrchestratorError> {
        let mut summaries = Vec::new();
        for path in self.dir.list_dirs().await? {
            let point = PointDir::new(Dir::new(path));
            match point.metadata_file().read_json::<RollbackMetadata>().await {
                Ok(metadata) => summaries.push(RollbackSummary::from(&metadata)),
                Err(e) => warn!(path = %point.path().display(), "Skipping unreadable rollback point: {}", e),
            }
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    pub async fn load(
        &self,
        id: &str,
    ) -> Result<(RollbackMetadata, StateSnapshot), OrchestratorError> {
        let point = PointDir::new(self.dir.subdir(id));
        if !point.metadata_file().exists().await {
            return Err(OrchestratorError::RollbackNotFound(id.to_string()));
        }
        let metadata = point.metadata_file().read_json().await?;
        let state = point.state_file().read_json().await?;
        Ok((metadata, state))
    }

    /// Restore rollback point `id`.
    ///
    /// A safety backup of the current state is always taken before anything
    /// is touched. A failed restart is reported, never retried or rolled back.
    pub async fn execute(&self, id: &str, force: bool) -> Result<RollbackOutcome, OrchestratorError> {
        let (metadata, state) = self.load(id).await?;

        if !force {
            let prompt = format!(
                "Roll back to {} ({}, created {})?",
                metadata.id, metadata.description, metadata.created_at
            );
            if !self.confirmation.confirm(&prompt).await {
                info!(id, "Rollback cancelled");
                return Err(OrchestratorError::RollbackCancelled);
            }
        }

        let safety_backup_id = self
            .create_point(SAFETY_BACKUP_DESCRIPTION, metadata.targets.clone())
            .await
            .map_err(|e| {
                OrchestratorError::RollbackError(format!(
                    "safety backup failed, nothing was changed: {}",
                    e
                ))
            })?;
        info!(id, safety_backup = %safety_backup_id, "Executing rollback");

        let targets = self.target_services(&metadata.targets);
        let mut stopped = Vec::new();
        for service in targets.iter().rev() {
            match self.engine.stop(service).await {
                Ok(()) => stopped.push(service.clone()),
                Err(e) => warn!(service = %service, "Stop failed during rollback: {}", e),
            }
        }

        let point = PointDir::new(self.dir.subdir(id));
        let restored_files =
            match restore_config(&self.options.project_root, &point.config_dir(), &metadata.files).await {
                Ok(count) => count,
                Err(e) => {
                    return Ok(self.finish(RollbackOutcome {
                        id: id.to_string(),
                        safety_backup_id: safety_backup_id.clone(),
                        status: RollbackStatus::Failed,
                        stopped,
                        restored_files: 0,
                        restarted: vec![],
                        failed_restarts: vec![],
                        unhealthy_critical: vec![],
                        message: format!(
                            "configuration restore failed: {}; recover with rollback point {}",
                            e, safety_backup_id
                        ),
                    }));
                }
            };

        let to_restart = self.registry.dependency_order(&state.running());
        let mut restarted = Vec::new();
        let mut failed_restarts = Vec::new();
        for service in &to_restart {
            match self.engine.start(service).await {
                Ok(()) => restarted.push(service.clone()),
                Err(e) => {
                    error!(service = %service, "Restart failed after restore: {}", e);
                    failed_restarts.push(service.clone());
                }
            }
        }

        let mut unhealthy_critical = Vec::new();
        for service in &restarted {
            let descriptor = self.registry.describe(service)?;
            if !descriptor.critical {
                continue;
            }
            if self
                .readiness
                .wait_ready(descriptor, &self.options.revalidation)
                .await
                .is_err()
            {
                unhealthy_critical.push(service.clone());
            }
        }

        let (status, message) = if !failed_restarts.is_empty() {
            (
                RollbackStatus::Failed,
                format!(
                    "restart failed for {}; recover with rollback point {}",
                    failed_restarts.join(", "),
                    safety_backup_id
                ),
            )
        } else if !unhealthy_critical.is_empty() {
            (
                RollbackStatus::Partial,
                format!(
                    "restored, but critical services not ready: {}",
                    unhealthy_critical.join(", ")
                ),
            )
        } else {
            (RollbackStatus::Full, "rollback completed".to_string())
        };

        Ok(self.finish(RollbackOutcome {
            id: id.to_string(),
            safety_backup_id,
            status,
            stopped,
            restored_files,
            restarted,
            failed_restarts,
            unhealthy_critical,
            message,
        }))
    }

    fn finish(&self, outcome: RollbackOutcome) -> RollbackOutcome {
        match outcome.status {
            RollbackStatus::Full => info!(id = %outcome.id, "{}", outcome.message),
            RollbackStatus::Partial => warn!(id = %outcome.id, "{}", outcome.message),
            RollbackStatus::Failed => error!(id = %outcome.id, "{}", outcome.message),
        }
        self.record("rollback_executed", &outcome);
        outcome
    }
}

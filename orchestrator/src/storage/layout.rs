//! State directory layout

use std::path::PathBuf;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default state directory, relative to the project root
pub const DEFAULT_STATE_DIR: &str = ".spatial-deploy";

/// Storage layout for orchestrator state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Settings file
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Optional service registry override
    pub fn registry_file(&self) -> File {
        File::new(self.base_dir.join("services.json"))
    }

    /// Phase checkpoints
    pub fn checkpoint_file(&self) -> File {
        File::new(self.base_dir.join("checkpoints.json"))
    }

    /// Service to last-built image digest map
    pub fn build_cache_file(&self) -> File {
        File::new(self.base_dir.join("build-cache.json"))
    }

    /// Most recent deployment verdict
    pub fn verdict_file(&self) -> File {
        File::new(self.base_dir.join("last-verdict.json"))
    }

    /// Single-run lock
    pub fn lock_file(&self) -> File {
        File::new(self.base_dir.join("run.lock"))
    }

    /// Rollback points, one subdirectory each
    pub fn rollback_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("rollbacks"))
    }

    /// Append-only audit trail
    pub fn audit_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("audit"))
    }

    /// Compliance reports, run summaries and operator reports
    pub fn reports_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("reports"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), OrchestratorError> {
        Dir::new(&self.base_dir).create().await?;
        self.rollback_dir().create().await?;
        self.audit_dir().create().await?;
        self.reports_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

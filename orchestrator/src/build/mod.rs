//! Image acquisition: builds, pulls, integrity

pub mod cache;
pub mod integrity;
pub mod resolver;
pub mod scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::registry::descriptor::ServiceDescriptor;

/// Local image store and builder
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Digest of `image` in the local store, if present
    async fn local_digest(&self, image: &str) -> Result<Option<String>, OrchestratorError>;

    /// Build the service's image; returns the produced digest
    async fn build(&self, service: &ServiceDescriptor) -> Result<String, OrchestratorError>;

    async fn pull(&self, image: &str) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildWave {
    Light,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Pending,
    Success,
    Failure,
}

/// One build attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTask {
    pub service: String,
    /// Monotonically increasing within a scheduler
    pub attempt: u64,
    pub wave: BuildWave,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: BuildOutcome,
    /// Digest of the produced image
    pub artifact: Option<String>,
    pub error: Option<String>,
}

impl BuildTask {
    pub fn succeeded(&self) -> bool {
        self.outcome == BuildOutcome::Success
    }
}

/// Tasks of one wave once it has drained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSummary {
    pub wave: BuildWave,
    pub tasks: Vec<BuildTask>,
}

impl WaveSummary {
    /// A wave failed iff any of its tasks failed
    pub fn failed(&self) -> bool {
        self.tasks.iter().any(|t| !t.succeeded())
    }

    pub fn succeeded_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.succeeded()).count()
    }
}

/// Everything IMAGE_BUILD did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Services that required an image from a local build
    pub expected: usize,
    /// Built now or already present
    pub built: usize,
    /// Present in the local store and not in the rebuild set
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    pub coverage: f64,
    pub threshold: f64,
    pub waves: Vec<WaveSummary>,
    /// Pre-built images made available locally
    pub pulled: Vec<String>,
    /// Pre-built images that could not be pulled (warnings only)
    pub pull_failures: Vec<String>,
}

impl BuildReport {
    pub fn passed(&self) -> bool {
        self.coverage >= self.threshold
    }
}

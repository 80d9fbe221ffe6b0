//! Durable record of phase progress
//!
//! The store holds exactly one record per phase. Writes go through an atomic
//! temp-file rename, so after a crash `load()` returns the last state that was
//! fully saved. A missing or unreadable file means "no progress".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::deploy::phase::{Phase, PhaseStatus};
use crate::errors::OrchestratorError;
use crate::filesys::file::File;

const FORMAT_VERSION: u32 = 1;

/// Persisted status of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    fn not_started(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::NotStarted,
            timestamp: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    records: Vec<CheckpointRecord>,
}

/// Where a run should pick up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// Run from this phase to the end
    From(Phase),
    /// Every phase is done: re-run HEALTH_CHECK and COMPLETE only
    StatusOnly,
}

impl ResumePlan {
    /// Compute the resume point from loaded records
    pub fn from_records(records: &[CheckpointRecord]) -> Self {
        let statuses: BTreeMap<Phase, PhaseStatus> =
            records.iter().map(|r| (r.phase, r.status)).collect();

        Phase::ALL
            .iter()
            .find(|phase| {
                !statuses
                    .get(*phase)
                    .map(|status| status.is_done())
                    .unwrap_or(false)
            })
            .map(|phase| ResumePlan::From(*phase))
            .unwrap_or(ResumePlan::StatusOnly)
    }

    /// The phases this plan executes, in order
    pub fn phases(&self) -> Vec<Phase> {
        match self {
            ResumePlan::From(start) => Phase::ALL[start.index()..].to_vec(),
            ResumePlan::StatusOnly => vec![Phase::HealthCheck, Phase::Complete],
        }
    }
}

/// File-backed checkpoint store
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    file: File,
}

impl CheckpointStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// All checkpoints in phase order, one per phase
    pub async fn load(&self) -> Vec<CheckpointRecord> {
        let stored = self.read_records().await;
        Phase::ALL
            .iter()
            .map(|phase| {
                stored
                    .get(phase)
                    .cloned()
                    .unwrap_or_else(|| CheckpointRecord::not_started(*phase))
            })
            .collect()
    }

    /// Persist `status` for `phase`, overwriting the prior record.
    ///
    /// A done status is rejected while any earlier phase is not done. A
    /// not-done status resets every later phase to `not_started`, so a later
    /// phase never reports completed ahead of an earlier one.
    pub async fn save(
        &self,
        phase: Phase,
        status: PhaseStatus,
    ) -> Result<CheckpointRecord, OrchestratorError> {
        let mut records: BTreeMap<Phase, CheckpointRecord> = self
            .load()
            .await
            .into_iter()
            .map(|r| (r.phase, r))
            .collect();

        if status.is_done() {
            if let Some(pending) = phase
                .predecessors()
                .iter()
                .find(|p| !records.get(*p).map(|r| r.status.is_done()).unwrap_or(false))
            {
                return Err(OrchestratorError::StorageError(format!(
                    "cannot mark {} {} while {} is not completed",
                    phase, status, pending
                )));
            }
        } else {
            for later in phase.successors() {
                records.insert(*later, CheckpointRecord::not_started(*later));
            }
        }

        let record = CheckpointRecord {
            phase,
            status,
            timestamp: Some(Utc::now()),
        };
        records.insert(phase, record.clone());

        let document = CheckpointDocument {
            version: FORMAT_VERSION,
            records: records.into_values().collect(),
        };
        self.file.write_json(&document).await?;
        debug!(phase = %phase, status = %status, "checkpoint saved");

        Ok(record)
    }

    /// Clear all records
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        self.file.delete().await
    }

    async fn read_records(&self) -> BTreeMap<Phase, CheckpointRecord> {
        if !self.file.exists().await {
            return BTreeMap::new();
        }

        match self.file.read_json::<CheckpointDocument>().await {
            Ok(document) => document
                .records
                .into_iter()
                .map(|r| (r.phase, r))
                .collect(),
            Err(e) => {
                warn!(
                    path = %self.file.path().display(),
                    "Unreadable checkpoint file, treating as no progress: {}", e
                );
                BTreeMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> CheckpointStore {
        CheckpointStore::new(File::new(dir.path().join("checkpoints.json")))
    }

    #[tokio::test]
    async fn test_missing_store_means_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let records = store(&dir).load().await;

        assert_eq!(records.len(), Phase::ALL.len());
        assert!(records.iter().all(|r| r.status == PhaseStatus::NotStarted));
        assert_eq!(
            ResumePlan::from_records(&records),
            ResumePlan::From(Phase::Cleanup)
        );
    }

    #[tokio::test]
    async fn test_corrupt_store_means_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("checkpoints.json"), "{ not json").unwrap();

        let records = store(&dir).load().await;
        assert!(records.iter().all(|r| r.status == PhaseStatus::NotStarted));
    }

    #[tokio::test]
    async fn test_resume_after_completed_phases() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.save(Phase::Cleanup, PhaseStatus::Completed).await.unwrap();
        store
            .save(Phase::Validation, PhaseStatus::CompletedWithWarnings)
            .await
            .unwrap();
        store
            .save(Phase::PackageValidation, PhaseStatus::Started)
            .await
            .unwrap();

        let plan = ResumePlan::from_records(&store.load().await);
        assert_eq!(plan, ResumePlan::From(Phase::PackageValidation));
        assert_eq!(plan.phases().first(), Some(&Phase::PackageValidation));
        assert_eq!(plan.phases().len(), 7);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let result = store.save(Phase::ImageBuild, PhaseStatus::Completed).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_restarting_a_phase_resets_later_phases() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for phase in Phase::ALL {
            store.save(phase, PhaseStatus::Completed).await.unwrap();
        }
        assert_eq!(
            ResumePlan::from_records(&store.load().await),
            ResumePlan::StatusOnly
        );

        store.save(Phase::HealthCheck, PhaseStatus::Started).await.unwrap();

        let records = store.load().await;
        assert_eq!(records[Phase::HealthCheck.index()].status, PhaseStatus::Started);
        assert_eq!(records[Phase::Complete.index()].status, PhaseStatus::NotStarted);
        assert_eq!(records[Phase::Monitoring.index()].status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_reset_clears_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(Phase::Cleanup, PhaseStatus::Completed).await.unwrap();

        store.reset().await.unwrap();
        store.reset().await.unwrap();

        assert_eq!(
            ResumePlan::from_records(&store.load().await),
            ResumePlan::From(Phase::Cleanup)
        );
    }
}

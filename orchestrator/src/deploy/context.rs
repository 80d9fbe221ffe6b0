//! Per-run orchestration context

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::build::BuildReport;
use crate::deploy::phase::{Phase, PhaseStatus};
use crate::health::validator::DeploymentVerdict;
use crate::storage::settings::EnvironmentMode;
use crate::utils::time_based_id;

/// How long a phase took and how it ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub duration_ms: u64,
}

/// Snapshot of the issue counters, taken when a phase starts
#[derive(Debug, Clone, Copy)]
pub struct IssueMark {
    failed: usize,
    warnings: usize,
}

/// Everything a run accumulates while its phases execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub environment: EnvironmentMode,
    /// Phases this run executes, in order
    pub phases: Vec<Phase>,
    pub current_phase: Option<Phase>,
    pub failed_services: BTreeSet<String>,
    pub warnings: Vec<String>,
    pub performance_issues: Vec<String>,
    pub security_issues: Vec<String>,
    pub build_report: Option<BuildReport>,
    pub verdict: Option<DeploymentVerdict>,
    pub compliance_report: Option<PathBuf>,
    /// Rollback point recorded before services were touched
    pub baseline_rollback: Option<String>,
    pub timings: Vec<PhaseTiming>,
}

impl RunContext {
    pub fn new(environment: EnvironmentMode, phases: Vec<Phase>) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: time_based_id("run", started_at),
            started_at,
            environment,
            phases,
            current_phase: None,
            failed_services: BTreeSet::new(),
            warnings: Vec::new(),
            performance_issues: Vec::new(),
            security_issues: Vec::new(),
            build_report: None,
            verdict: None,
            compliance_report: None,
            baseline_rollback: None,
            timings: Vec::new(),
        }
    }

    /// Record a service failure; the run carries on
    pub fn fail_service(&mut self, service: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(service, "{}", reason);
        self.failed_services.insert(service.to_string());
        self.warnings.push(format!("{}: {}", service, reason));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn mark(&self) -> IssueMark {
        IssueMark {
            failed: self.failed_services.len(),
            warnings: self.warnings.len(),
        }
    }

    /// Whether anything was recorded since `mark`
    pub fn has_issues_since(&self, mark: IssueMark) -> bool {
        self.failed_services.len() > mark.failed || self.warnings.len() > mark.warnings
    }

    pub fn record_timing(&mut self, phase: Phase, status: PhaseStatus, duration_ms: u64) {
        self.timings.push(PhaseTiming {
            phase,
            status,
            duration_ms,
        });
    }

    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }
}

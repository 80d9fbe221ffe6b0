//! Deployment phases and their checkpoint statuses

use std::fmt;

use serde::{Deserialize, Serialize};

/// One ordered stage of the deployment pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Cleanup,
    Validation,
    PackageValidation,
    ImageBuild,
    CoreServices,
    AppServices,
    Monitoring,
    HealthCheck,
    Complete,
}

impl Phase {
    /// Every phase in execution order
    pub const ALL: [Phase; 9] = [
        Phase::Cleanup,
        Phase::Validation,
        Phase::PackageValidation,
        Phase::ImageBuild,
        Phase::CoreServices,
        Phase::AppServices,
        Phase::Monitoring,
        Phase::HealthCheck,
        Phase::Complete,
    ];

    /// Position in the pipeline (0-based)
    pub fn index(&self) -> usize {
        Phase::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or(Phase::ALL.len())
    }

    /// The phase that follows this one, if any
    pub fn next(&self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }

    /// Phases strictly before this one
    pub fn predecessors(&self) -> &'static [Phase] {
        &ORDER[..self.index()]
    }

    /// Phases strictly after this one
    pub fn successors(&self) -> &'static [Phase] {
        &ORDER[(self.index() + 1).min(ORDER.len())..]
    }

    /// Phases that start or stop platform services
    pub fn touches_services(&self) -> bool {
        matches!(
            self,
            Phase::CoreServices | Phase::AppServices | Phase::Monitoring
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Cleanup => "CLEANUP",
            Phase::Validation => "VALIDATION",
            Phase::PackageValidation => "PACKAGE_VALIDATION",
            Phase::ImageBuild => "IMAGE_BUILD",
            Phase::CoreServices => "CORE_SERVICES",
            Phase::AppServices => "APP_SERVICES",
            Phase::Monitoring => "MONITORING",
            Phase::HealthCheck => "HEALTH_CHECK",
            Phase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Phase::ALL
            .iter()
            .find(|p| p.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

static ORDER: [Phase; 9] = Phase::ALL;

/// Checkpoint status of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    Started,
    Completed,
    Failed,
    CompletedWithWarnings,
}

impl PhaseStatus {
    /// Whether the phase counts as finished for resume purposes
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::CompletedWithWarnings
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::Started => "started",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::CompletedWithWarnings => "completed_with_warnings",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

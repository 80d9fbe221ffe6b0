//! Report command - everything the orchestrator knows, in one document.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use crate::audit::compliance::ComplianceReport;
use crate::health::validator::DeploymentVerdict;
use crate::rollback::snapshot::RollbackSummary;
use crate::storage::checkpoint::CheckpointRecord;
use crate::telemetry::{sample_host_metrics, HostMetrics};
use crate::utils::{version_info, VersionInfo};

use super::output::{print_info, print_json};
use super::CommandContext;

#[derive(Debug, Args)]
pub struct ReportCommand {}

#[derive(Debug, Serialize)]
struct ComplianceOverview {
    generated_at: DateTime<Utc>,
    passed: bool,
    failed_services: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StateReport {
    generated_at: DateTime<Utc>,
    version: VersionInfo,
    checkpoints: Vec<CheckpointRecord>,
    last_verdict: Option<DeploymentVerdict>,
    compliance: Option<ComplianceOverview>,
    rollback_points: Vec<RollbackSummary>,
    build_cache_entries: usize,
    host: HostMetrics,
}

impl ReportCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;
        let layout = &state.options.layout;

        let verdict_file = layout.verdict_file();
        let last_verdict = if verdict_file.exists().await {
            verdict_file.read_json().await.ok()
        } else {
            None
        };
        let compliance =
            ComplianceReport::latest(&layout.reports_dir())
                .await
                .map(|report| ComplianceOverview {
                    generated_at: report.generated_at,
                    passed: report.passed(),
                    failed_services: report.failed_services(),
                });

        let generated_at = Utc::now();
        let report = StateReport {
            generated_at,
            version: version_info(),
            checkpoints: state.checkpoints.load().await,
            last_verdict,
            compliance,
            rollback_points: state.rollback.list().await?,
            build_cache_entries: state.cache.len(),
            host: sample_host_metrics().await,
        };

        let file = layout
            .reports_dir()
            .file(format!("report-{}.json", generated_at.format("%Y%m%dT%H%M%SZ")));
        file.write_json(&report).await?;
        print_json(&report)?;
        print_info(&format!("Report saved to {}", file.path().display()));
        Ok(0)
    }
}

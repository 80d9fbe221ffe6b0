//! Status command - checkpoint progress plus a fresh health grade.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use tracing::warn;

use crate::deploy::phase::PhaseStatus;
use crate::errors::OrchestratorError;
use crate::health::validator::{DeploymentVerdict, SampleVerdict};
use crate::storage::checkpoint::ResumePlan;
use crate::storage::layout::StorageLayout;
use crate::storage::lock::RunLock;

use super::output::{print_json, print_warning};
use super::CommandContext;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Print the verdict as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;
        let records = state.checkpoints.load().await;
        let verdict = state
            .validator()
            .validate(&state.registry.names(), &state.registry.thresholds())
            .await;
        let recorded = record_verdict(&state.options.layout, &verdict).await?;

        if self.json {
            print_json(&serde_json::json!({
                "checkpoints": records,
                "verdict": verdict,
            }))?;
            return Ok(verdict.verdict.exit_code());
        }

        if !recorded {
            print_warning("Another run holds the lock; last verdict left unchanged");
        }
        println!("{}", "Phases".bold());
        for record in &records {
            let status = match record.status {
                PhaseStatus::Completed => record.status.as_str().green(),
                PhaseStatus::CompletedWithWarnings | PhaseStatus::Started => {
                    record.status.as_str().yellow()
                }
                PhaseStatus::Failed => record.status.as_str().red(),
                PhaseStatus::NotStarted => record.status.as_str().dimmed(),
            };
            let at = record
                .timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            println!("  {:<20} {:<24} {}", record.phase.as_str(), status, at);
        }
        match ResumePlan::from_records(&records) {
            ResumePlan::From(phase) => println!("\nNext deploy resumes at {}", phase),
            ResumePlan::StatusOnly => println!("\nAll phases complete"),
        }

        println!("\n{}", "Endpoints".bold());
        for sample in &verdict.samples {
            let label = match sample.verdict {
                SampleVerdict::Pass => "pass".green(),
                SampleVerdict::ThresholdExceeded => "slow".yellow(),
                SampleVerdict::Unreachable => "unreachable".red(),
                SampleVerdict::NotRunning => "not running".red(),
            };
            println!(
                "  {:<22} {:<12} {:>6}ms / {}ms",
                sample.service, label, sample.latency_ms, sample.threshold_ms
            );
        }
        println!(
            "\nVerdict: {} ({}/{} services running, {}/{} endpoints within threshold)",
            verdict.verdict.as_str().to_uppercase().as_str().bold(),
            verdict.services_running,
            verdict.services_total,
            verdict.endpoints_passing,
            verdict.endpoints_probed
        );
        Ok(verdict.verdict.exit_code())
    }
}

/// Write the verdict under the run lock. A run holding the lock owns the
/// verdict file, so nothing is written and `false` is returned.
async fn record_verdict(
    layout: &StorageLayout,
    verdict: &DeploymentVerdict,
) -> Result<bool, OrchestratorError> {
    let run_lock = match RunLock::acquire(layout.lock_file(), "status").await {
        Ok(run_lock) => run_lock,
        Err(OrchestratorError::Locked(holder)) => {
            warn!(holder = %holder, "verdict not recorded while another run is active");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    layout.verdict_file().write_json(verdict).await?;
    run_lock.release().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::verdict::Verdict;

    fn verdict() -> DeploymentVerdict {
        DeploymentVerdict {
            verdict: Verdict::Good,
            service_ratio: 1.0,
            endpoint_ratio: 0.75,
            services_total: 4,
            services_running: 4,
            endpoints_probed: 4,
            endpoints_passing: 3,
            not_running: vec![],
            samples: vec![],
            checked_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_verdict_not_written_while_a_run_holds_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();

        let deploy = RunLock::acquire(layout.lock_file(), "deploy").await.unwrap();
        assert!(!record_verdict(&layout, &verdict()).await.unwrap());
        assert!(!layout.verdict_file().exists().await);
        // the deploy lock survives
        assert!(layout.lock_file().exists().await);

        deploy.release().await.unwrap();
        assert!(record_verdict(&layout, &verdict()).await.unwrap());
        let written: DeploymentVerdict = layout.verdict_file().read_json().await.unwrap();
        assert_eq!(written.verdict, Verdict::Good);
        assert!(!layout.lock_file().exists().await);
    }
}

//! Run summary written by COMPLETE

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::deploy::context::{PhaseTiming, RunContext};
use crate::deploy::phase::Phase;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::health::verdict::Verdict;
use crate::storage::settings::EnvironmentMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub run_id: String,
    pub environment: EnvironmentMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<Phase>,
    pub verdict: Option<Verdict>,
    pub service_ratio: Option<f64>,
    pub endpoint_ratio: Option<f64>,
    pub build_coverage: Option<f64>,
    pub failed_services: Vec<String>,
    pub performance_issues: Vec<String>,
    pub security_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub baseline_rollback: Option<String>,
    pub timings: Vec<PhaseTiming>,
}

impl DeploymentSummary {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id.clone(),
            environment: ctx.environment,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            duration_ms: ctx.elapsed_ms(),
            phases: ctx.phases.clone(),
            verdict: ctx.verdict.as_ref().map(|v| v.verdict),
            service_ratio: ctx.verdict.as_ref().map(|v| v.service_ratio),
            endpoint_ratio: ctx.verdict.as_ref().map(|v| v.endpoint_ratio),
            build_coverage: ctx.build_report.as_ref().map(|b| b.coverage),
            failed_services: ctx.failed_services.iter().cloned().collect(),
            performance_issues: ctx.performance_issues.clone(),
            security_issues: ctx.security_issues.clone(),
            warnings: ctx.warnings.clone(),
            baseline_rollback: ctx.baseline_rollback.clone(),
            timings: ctx.timings.clone(),
        }
    }

    /// Human-readable summary; same input, same text
    pub fn render(&self) -> String {
        let mut out = String::new();
        let verdict = match self.verdict {
            Some(v) => {
                let label = v.as_str().to_uppercase();
                match v {
                    Verdict::Excellent | Verdict::Good => label.as_str().green().bold(),
                    Verdict::Degraded => label.as_str().yellow().bold(),
                    Verdict::Failed => label.as_str().red().bold(),
                }
            }
            None => "NOT EVALUATED".dimmed(),
        };

        let _ = writeln!(out, "{}", "Deployment summary".bold());
        let _ = writeln!(out, "  run:          {}", self.run_id);
        let _ = writeln!(out, "  environment:  {}", self.environment);
        let _ = writeln!(out, "  duration:     {:.1}s", self.duration_ms as f64 / 1000.0);
        let _ = writeln!(out, "  verdict:      {}", verdict);
        if let (Some(services), Some(endpoints)) = (self.service_ratio, self.endpoint_ratio) {
            let _ = writeln!(
                out,
                "  services:     {:.0}% running, {:.0}% of endpoints within threshold",
                services * 100.0,
                endpoints * 100.0
            );
        }
        if let Some(coverage) = self.build_coverage {
            let _ = writeln!(out, "  build:        {:.0}% coverage", coverage * 100.0);
        }

        section(&mut out, "Failed services", &self.failed_services);
        section(&mut out, "Performance issues", &self.performance_issues);
        section(&mut out, "Security issues", &self.security_issues);

        if let Some(id) = &self.baseline_rollback {
            let _ = writeln!(out, "\nBaseline rollback point: {}", id);
        }
        out
    }

    /// Save as `summary-<run id>.json`
    pub async fn save(&self, dir: &Dir) -> Result<PathBuf, OrchestratorError> {
        let file = dir.file(format!("summary-{}.json", self.run_id));
        file.write_json(self).await?;
        Ok(file.path().to_path_buf())
    }
}

fn section(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n{} ({})", title.bold(), items.len());
    if items.is_empty() {
        let _ = writeln!(out, "  {}", "none".dimmed());
    }
    for item in items {
        let _ = writeln!(out, "  - {}", item);
    }
}

//! Security command - run the dependency audit outside a deployment.

use anyhow::Result;
use clap::Args;

use crate::audit::compliance::run_compliance;

use super::output::{print_info, print_json, print_success, print_warning};
use super::CommandContext;

#[derive(Debug, Args)]
pub struct SecurityCommand {
    /// Audit one service only.
    service: Option<String>,
}

impl SecurityCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;
        let auditor = state.auditor();
        let report = run_compliance(
            &state.registry,
            auditor.as_ref(),
            self.service.as_deref(),
            state.options.environment,
        )
        .await?;

        let path = report.save(&state.options.layout.reports_dir()).await?;
        state.audit.record("compliance", &report)?;
        print_json(&report)?;
        print_info(&format!("Report saved to {}", path.display()));

        if report.passed() {
            print_success("Dependency audit passed");
            Ok(0)
        } else {
            print_warning(&format!(
                "Dependency audit failed for {}",
                report.failed_services().join(", ")
            ));
            Ok(2)
        }
    }
}

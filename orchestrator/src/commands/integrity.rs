//! Integrity command - compare local images, build cache and running containers.

use anyhow::Result;
use clap::Args;

use super::output::{print_json, print_success, print_warning};
use super::CommandContext;

#[derive(Debug, Args)]
pub struct IntegrityCommand {
    /// Check one service only.
    service: Option<String>,
}

impl IntegrityCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;
        let checks = state.verify_integrity(self.service.as_deref()).await?;
        print_json(&checks)?;

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed())
            .map(|c| c.service.as_str())
            .collect();
        if failed.is_empty() {
            print_success(&format!("{} image(s) verified", checks.len()));
            Ok(0)
        } else {
            print_warning(&format!("integrity issues: {}", failed.join(", ")));
            Ok(2)
        }
    }
}

//! Reset command - forget all phase progress.

use anyhow::Result;
use clap::Args;

use crate::rollback::{Confirmation, StdinConfirmation};

use super::output::{print_info, print_success};
use super::{lock, CommandContext};

#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Do not ask for confirmation.
    #[arg(long, short)]
    yes: bool,
}

impl ResetCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;

        if !self.yes
            && !StdinConfirmation
                .confirm("Clear all deployment checkpoints? The next deploy starts from CLEANUP.")
                .await
        {
            print_info("Reset cancelled");
            return Ok(1);
        }

        let run_lock = lock(&state, "reset").await?;
        state.checkpoints.reset().await?;
        state.audit.record("checkpoints_reset", &serde_json::json!({}))?;
        run_lock.release().await?;

        print_success("Checkpoints cleared");
        Ok(0)
    }
}

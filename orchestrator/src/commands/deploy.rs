//! Deploy command - run the phase pipeline from the resume point.

use anyhow::Result;
use clap::Args;

use super::{lock, CommandContext};

#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Rebuild these services even when their image is present.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    rebuild: Vec<String>,

    /// Restore the pre-deployment baseline if a service phase fails.
    #[arg(long)]
    auto_rollback: bool,
}

impl DeployCommand {
    pub async fn run(self, mut ctx: CommandContext) -> Result<i32> {
        ctx.options.engine.rebuild.extend(self.rebuild);
        if self.auto_rollback {
            ctx.options.engine.auto_rollback = true;
        }

        let state = ctx.state().await?;
        let run_lock = lock(&state, "deploy").await?;

        let engine = state.phase_engine();
        let result = engine.run().await;
        run_lock.release().await?;

        let outcome = result?;
        print!("{}", outcome.summary.render());
        Ok(outcome.exit_code())
    }
}

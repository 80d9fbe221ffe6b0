//! Monitor command - run the safeguards monitor against one service.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use super::output::{print_json, print_warning};
use super::{lock, CommandContext};

#[derive(Debug, Args)]
pub struct MonitorCommand {
    /// Service to watch.
    service: String,

    /// How long to watch, in seconds.
    duration: Option<u64>,

    /// Seconds between samples.
    #[arg(long)]
    interval: Option<u64>,
}

impl MonitorCommand {
    pub async fn run(self, mut ctx: CommandContext) -> Result<i32> {
        if let Some(secs) = self.duration {
            ctx.options.safeguards.duration = Duration::from_secs(secs);
        }
        if let Some(secs) = self.interval {
            ctx.options.safeguards.interval = Duration::from_secs(secs.max(1));
        }

        let state = ctx.state().await?;
        state.registry.describe(&self.service)?;
        let run_lock = lock(&state, "monitor").await?;
        let result = state.monitor().run(&self.service).await;
        run_lock.release().await?;
        let summary = result?;

        let file = state.options.layout.reports_dir().file(format!(
            "monitor-{}-{}.json",
            summary.service,
            Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        file.write_json(&summary).await?;
        print_json(&summary)?;

        if summary.critical_events > 0 {
            print_warning(&format!(
                "{} critical event(s) on {}",
                summary.critical_events, summary.service
            ));
            return Ok(2);
        }
        Ok(0)
    }
}

//! Health command - probe one endpoint against its latency threshold.

use anyhow::Result;
use clap::Args;

use crate::registry::descriptor::PerformanceThreshold;

use super::output::print_json;
use super::CommandContext;

#[derive(Debug, Args)]
pub struct HealthCommand {
    service: String,

    /// Path to probe; the service's health path by default.
    path: Option<String>,

    /// Host port to probe; the service's probe port by default.
    port: Option<u16>,
}

impl HealthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;
        let descriptor = state.registry.describe(&self.service)?;

        let path = self
            .path
            .or_else(|| descriptor.health_path.clone())
            .unwrap_or_else(|| "/health".to_string());
        let (port, internal) = match self.port {
            Some(port) => (port, false),
            None => match descriptor.probe_port() {
                Some(port) => (port, descriptor.internal),
                None => anyhow::bail!("{} exposes no port; pass one explicitly", self.service),
            },
        };

        let threshold = PerformanceThreshold {
            internal,
            ..PerformanceThreshold::new(&self.service, port, &path, descriptor.max_latency_ms)
        };
        let sample = state.validator().check_endpoint(&threshold).await;
        print_json(&sample)?;

        Ok(if sample.passed() { 0 } else { 2 })
    }
}

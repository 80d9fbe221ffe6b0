//! CLI commands

mod deploy;
mod health;
mod integrity;
mod monitor;
pub mod output;
mod report;
mod reset;
mod rollback;
mod security;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::OrchestratorError;
use crate::logs::{init_logging, LogLevel, LogOptions};
use crate::rollback::StdinConfirmation;
use crate::storage::layout::{StorageLayout, DEFAULT_STATE_DIR};
use crate::storage::lock::RunLock;
use crate::storage::settings::{EnvironmentMode, Settings};
use crate::utils::version_info;

/// Spatial Platform deployment orchestrator.
#[derive(Debug, Parser)]
#[command(name = "spatial-deploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// State directory (checkpoints, build cache, rollbacks, audit trail).
    #[arg(long, global = true, env = "SPATIAL_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Settings file; defaults to settings.json in the state directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment mode (development, staging, production).
    #[arg(long = "env", global = true)]
    environment: Option<EnvironmentMode>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy the platform, resuming from the last checkpoint.
    Deploy(deploy::DeployCommand),

    /// Show checkpoints and grade the running platform.
    Status(status::StatusCommand),

    /// Clear all phase checkpoints.
    Reset(reset::ResetCommand),

    /// Create, execute or list rollback points.
    Rollback(rollback::RollbackCommand),

    /// Watch one service's resource usage.
    Monitor(monitor::MonitorCommand),

    /// Probe a single service endpoint.
    Health(health::HealthCommand),

    /// Verify local images against the build cache and running containers.
    Integrity(integrity::IntegrityCommand),

    /// Run the dependency audit.
    Security(security::SecurityCommand),

    /// Print and save a full state report.
    Report(report::ReportCommand),

    /// Show version information.
    Version,
}

impl Cli {
    /// Run the command; the returned value is the process exit code
    pub async fn run(self) -> Result<i32> {
        if let Commands::Version = self.command {
            output::print_json(&version_info())?;
            return Ok(0);
        }

        let layout = StorageLayout::new(&self.state_dir);
        let settings_file = match &self.config {
            Some(path) => crate::filesys::file::File::new(path),
            None => layout.settings_file(),
        };
        let mut settings = Settings::load(&settings_file).await?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        if let Some(environment) = self.environment {
            settings.environment = environment;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        settings.validate()?;

        let log_options = LogOptions {
            log_level: settings.log_level,
            json_format: self.json_logs,
            ..Default::default()
        };
        if let Err(e) = init_logging(log_options) {
            eprintln!("Failed to initialize logging: {e}");
        }

        let ctx = CommandContext {
            options: AppOptions::from_settings(&settings, layout),
        };

        match self.command {
            Commands::Deploy(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Reset(cmd) => cmd.run(ctx).await,
            Commands::Rollback(cmd) => cmd.run(ctx).await,
            Commands::Monitor(cmd) => cmd.run(ctx).await,
            Commands::Health(cmd) => cmd.run(ctx).await,
            Commands::Integrity(cmd) => cmd.run(ctx).await,
            Commands::Security(cmd) => cmd.run(ctx).await,
            Commands::Report(cmd) => cmd.run(ctx).await,
            Commands::Version => Ok(0),
        }
    }
}

/// Shared command context
pub struct CommandContext {
    pub options: AppOptions,
}

impl CommandContext {
    /// Wire the application state
    pub async fn state(self) -> Result<AppState> {
        AppState::init(self.options, Arc::new(StdinConfirmation))
            .await
            .context("failed to initialize orchestrator state")
    }
}

/// Take the single-run lock for a command that writes shared state
pub async fn lock(state: &AppState, command: &str) -> Result<RunLock, OrchestratorError> {
    RunLock::acquire(state.options.layout.lock_file(), command).await
}

//! Rollback commands - create, execute and list rollback points.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use crate::errors::OrchestratorError;
use crate::rollback::manager::RollbackStatus;
use crate::rollback::snapshot::RollbackTargets;

use super::output::{print_info, print_json, print_success, print_warning};
use super::{lock, CommandContext};

#[derive(Debug, Args)]
pub struct RollbackCommand {
    #[command(subcommand)]
    command: RollbackCommands,
}

#[derive(Debug, Subcommand)]
enum RollbackCommands {
    /// Snapshot configuration and service state.
    Create {
        /// What this point is for.
        #[arg(long, short, default_value = "manual rollback point")]
        description: String,

        /// Services to cover; all services when omitted.
        services: Vec<String>,
    },

    /// Restore a rollback point.
    Execute {
        id: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// List rollback points, oldest first.
    List {
        #[arg(long)]
        json: bool,
    },
}

impl RollbackCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        let state = ctx.state().await?;

        match self.command {
            RollbackCommands::Create {
                description,
                services,
            } => {
                let run_lock = lock(&state, "rollback create").await?;
                let id = state
                    .rollback
                    .create_point(&description, RollbackTargets::from_list(services))
                    .await;
                run_lock.release().await?;
                print_success(&format!("Rollback point {} created", id?));
                Ok(0)
            }
            RollbackCommands::Execute { id, force } => {
                let run_lock = lock(&state, "rollback execute").await?;
                let result = state.rollback.execute(&id, force).await;
                run_lock.release().await?;

                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(OrchestratorError::RollbackCancelled) => {
                        print_info("Rollback cancelled, nothing was changed");
                        return Ok(1);
                    }
                    Err(e) => return Err(e.into()),
                };

                print_json(&outcome)?;
                match outcome.status {
                    RollbackStatus::Full => {
                        print_success(&outcome.message);
                        Ok(0)
                    }
                    RollbackStatus::Partial => {
                        print_warning(&outcome.message);
                        Ok(2)
                    }
                    RollbackStatus::Failed => {
                        print_warning(&outcome.message);
                        Ok(1)
                    }
                }
            }
            RollbackCommands::List { json } => {
                let points = state.rollback.list().await?;
                if json {
                    print_json(&points)?;
                    return Ok(0);
                }
                if points.is_empty() {
                    println!("{}", "No rollback points.".dimmed());
                }
                for point in &points {
                    println!(
                        "{}  {}  {:<12} {} ({} files)",
                        point.id.as_str().bold(),
                        point.created_at.format("%Y-%m-%d %H:%M:%S"),
                        point.targets,
                        point.description,
                        point.files
                    );
                }
                Ok(0)
            }
        }
    }
}

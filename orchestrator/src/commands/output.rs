//! Output helpers for CLI commands

use colored::Colorize;
use serde::Serialize;

use crate::errors::OrchestratorError;

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<(), OrchestratorError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

/// Print an error with a hint where one helps
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        let hint = match e {
            OrchestratorError::Locked(_) => Some("Wait for the other run to finish."),
            OrchestratorError::PhaseFailed { .. } => {
                Some("Fix the cause and run `deploy` again to resume from the failed phase.")
            }
            OrchestratorError::RollbackNotFound(_) => Some("List points with `rollback list`."),
            OrchestratorError::UnknownService(_) => Some("Service names come from the registry."),
            e if e.is_configuration() => Some("Check settings.json and the environment."),
            _ => None,
        };
        if let Some(hint) = hint {
            eprintln!("\n{}", format!("Hint: {}", hint).yellow());
        }
    }
}

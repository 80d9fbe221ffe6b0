//! Static prerequisite checks run by VALIDATION

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::storage::settings::Credentials;

/// A command-line tool the deployment relies on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequirement {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Missing mandatory tools fail VALIDATION; others only warn
    pub mandatory: bool,
}

impl ToolRequirement {
    pub fn new(name: &str, program: &str, args: &[&str], mandatory: bool) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            mandatory,
        }
    }
}

/// Prerequisite options
#[derive(Debug, Clone)]
pub struct Options {
    pub tools: Vec<ToolRequirement>,
    /// Absolute, or already resolved against the project root
    pub required_files: Vec<PathBuf>,
    pub required_credentials: Vec<String>,
    pub tool_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tools: vec![
                ToolRequirement::new("docker", "docker", &["--version"], true),
                ToolRequirement::new("docker compose", "docker", &["compose", "version"], true),
                ToolRequirement::new("pip-audit", "pip-audit", &["--version"], false),
            ],
            required_files: vec![PathBuf::from("docker-compose.yml")],
            required_credentials: Vec::new(),
            tool_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteReport {
    pub missing_tools: Vec<String>,
    pub missing_optional_tools: Vec<String>,
    pub missing_files: Vec<PathBuf>,
    pub missing_credentials: Vec<String>,
}

impl PrerequisiteReport {
    pub fn passed(&self) -> bool {
        self.missing_tools.is_empty()
            && self.missing_files.is_empty()
            && self.missing_credentials.is_empty()
    }

    /// One line per mandatory problem; credential values never appear
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(self.missing_tools.iter().map(|t| format!("tool not available: {}", t)));
        problems.extend(
            self.missing_files
                .iter()
                .map(|f| format!("required file missing: {}", f.display())),
        );
        problems.extend(
            self.missing_credentials
                .iter()
                .map(|c| format!("credential not set: {}", c)),
        );
        problems
    }
}

async fn tool_available(tool: &ToolRequirement, timeout: Duration) -> bool {
    let mut command = Command::new(&tool.program);
    command
        .args(&tool.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(tool = %tool.name, "not runnable: {}", e);
            false
        }
        Err(_) => false,
    }
}

/// Check tools, files and credentials
pub async fn check_prerequisites(options: &Options, credentials: &Credentials) -> PrerequisiteReport {
    let mut report = PrerequisiteReport::default();

    for tool in &options.tools {
        if tool_available(tool, options.tool_timeout).await {
            debug!(tool = %tool.name, "available");
        } else if tool.mandatory {
            report.missing_tools.push(tool.name.clone());
        } else {
            warn!(tool = %tool.name, "Optional tool not available");
            report.missing_optional_tools.push(tool.name.clone());
        }
    }

    for file in &options.required_files {
        if tokio::fs::metadata(file).await.is_err() {
            report.missing_files.push(file.clone());
        }
    }

    report.missing_credentials =
        credentials.missing(options.required_credentials.iter().map(String::as_str));

    if report.passed() {
        info!("All prerequisites satisfied");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_prerequisites_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("docker-compose.yml");
        std::fs::write(&present, "services: {}\n").unwrap();

        let options = Options {
            tools: vec![
                ToolRequirement::new("ghost", "spatial-no-such-tool", &[], true),
                ToolRequirement::new("phantom", "spatial-no-such-tool", &[], false),
            ],
            required_files: vec![present, dir.path().join(".env")],
            required_credentials: vec!["JWT_SECRET".to_string(), "POSTGRES_PASSWORD".to_string()],
            tool_timeout: Duration::from_secs(5),
        };
        let credentials = Credentials::load(["POSTGRES_PASSWORD"], |_| Some("pw".to_string()));

        let report = check_prerequisites(&options, &credentials).await;
        assert!(!report.passed());
        assert_eq!(report.missing_tools, vec!["ghost".to_string()]);
        assert_eq!(report.missing_optional_tools, vec!["phantom".to_string()]);
        assert_eq!(report.missing_files, vec![dir.path().join(".env")]);
        assert_eq!(report.missing_credentials, vec!["JWT_SECRET".to_string()]);
        assert_eq!(report.problems().len(), 3);
    }

    #[tokio::test]
    async fn test_optional_tools_do_not_fail() {
        let options = Options {
            tools: vec![ToolRequirement::new("phantom", "spatial-no-such-tool", &[], false)],
            required_files: vec![],
            required_credentials: vec![],
            tool_timeout: Duration::from_secs(5),
        };
        let report = check_prerequisites(&options, &Credentials::default()).await;
        assert!(report.passed());
    }
}

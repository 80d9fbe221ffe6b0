//! Dependency audit collaborator

pub mod compliance;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::errors::OrchestratorError;

/// Result of auditing one manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub passed: bool,
    /// Tool output; parsed JSON when the tool emitted JSON
    pub report: serde_json::Value,
}

/// `audit(manifest) -> pass/fail + report`
#[async_trait]
pub trait DependencyAuditor: Send + Sync {
    async fn audit(&self, manifest: &Path) -> Result<AuditFinding, OrchestratorError>;
}

/// Auditor options
#[derive(Debug, Clone)]
pub struct Options {
    pub program: String,

    /// Arguments; `{manifest}` is replaced with the manifest path
    pub args: Vec<String>,

    pub timeout: Duration,

    /// Directory relative manifest paths resolve against
    pub project_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            program: "pip-audit".to_string(),
            args: vec![
                "-r".to_string(),
                "{manifest}".to_string(),
                "-f".to_string(),
                "json".to_string(),
            ],
            timeout: Duration::from_secs(120),
            project_dir: PathBuf::from("."),
        }
    }
}

/// Runs an external audit command; exit status 0 means pass
#[derive(Debug, Clone)]
pub struct CommandAuditor {
    options: Options,
}

impl CommandAuditor {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    fn args_for(&self, manifest: &Path) -> Vec<String> {
        let manifest = manifest.to_string_lossy();
        self.options
            .args
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest))
            .collect()
    }
}

#[async_trait]
impl DependencyAuditor for CommandAuditor {
    async fn audit(&self, manifest: &Path) -> Result<AuditFinding, OrchestratorError> {
        let path = if manifest.is_absolute() {
            manifest.to_path_buf()
        } else {
            self.options.project_dir.join(manifest)
        };
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(OrchestratorError::ComplianceError(format!(
                "manifest not found: {}",
                path.display()
            )));
        }

        let args = self.args_for(&path);
        debug!("{} {}", self.options.program, args.join(" "));
        let mut command = Command::new(&self.options.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.options.timeout, command.output())
            .await
            .map_err(|_| {
                OrchestratorError::Timeout(format!(
                    "{} on {} after {:?}",
                    self.options.program,
                    path.display(),
                    self.options.timeout
                ))
            })?
            .map_err(|e| {
                OrchestratorError::ComplianceError(format!(
                    "failed to run {}: {}",
                    self.options.program, e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = serde_json::from_str(&stdout).unwrap_or_else(|_| {
            serde_json::json!({
                "stdout": stdout.trim(),
                "stderr": String::from_utf8_lossy(&output.stderr).trim(),
            })
        });

        Ok(AuditFinding {
            passed: output.status.success(),
            report,
        })
    }
}

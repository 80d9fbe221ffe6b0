//! Compliance report produced by PACKAGE_VALIDATION and the `security` command

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::DependencyAuditor;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::registry::descriptor::ServiceDescriptor;
use crate::registry::ServiceRegistry;
use crate::storage::settings::EnvironmentMode;

const REPORT_PREFIX: &str = "compliance-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestResult {
    pub manifest: PathBuf,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub report: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCompliance {
    pub service: String,
    pub passed: bool,
    pub manifests: Vec<ManifestResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub environment: EnvironmentMode,
    pub services: Vec<ServiceCompliance>,
}

impl ComplianceReport {
    pub fn passed(&self) -> bool {
        self.services.iter().all(|s| s.passed)
    }

    pub fn failed_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| !s.passed)
            .map(|s| s.service.clone())
            .collect()
    }

    /// Write the report to `dir` as `compliance-<timestamp>.json`
    pub async fn save(&self, dir: &Dir) -> Result<PathBuf, OrchestratorError> {
        let name = format!(
            "{}{}.json",
            REPORT_PREFIX,
            self.generated_at.format("%Y%m%dT%H%M%S%.3fZ")
        );
        let file = dir.file(&name);
        file.write_json(self).await?;
        Ok(file.path().to_path_buf())
    }

    /// Most recent report saved in `dir`
    pub async fn latest(dir: &Dir) -> Option<ComplianceReport> {
        let mut entries = tokio::fs::read_dir(dir.path()).await.ok()?;
        let mut newest: Option<String> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(REPORT_PREFIX)
                && name.ends_with(".json")
                && newest.as_ref().map(|n| &name > n).unwrap_or(true)
            {
                newest = Some(name);
            }
        }
        dir.file(newest?).read_json().await.ok()
    }
}

/// Audit every declared manifest of one service (or all services)
pub async fn run_compliance(
    registry: &ServiceRegistry,
    auditor: &dyn DependencyAuditor,
    service: Option<&str>,
    environment: EnvironmentMode,
) -> Result<ComplianceReport, OrchestratorError> {
    let targets: Vec<&ServiceDescriptor> = match service {
        Some(name) => vec![registry.describe(name)?],
        None => registry
            .all()
            .iter()
            .filter(|s| !s.manifests.is_empty())
            .collect(),
    };

    let mut services = Vec::with_capacity(targets.len());
    for target in targets {
        let mut manifests = Vec::with_capacity(target.manifests.len());
        for manifest in &target.manifests {
            let result = match auditor.audit(manifest).await {
                Ok(finding) => ManifestResult {
                    manifest: manifest.clone(),
                    passed: finding.passed,
                    error: None,
                    report: finding.report,
                },
                Err(e) => ManifestResult {
                    manifest: manifest.clone(),
                    passed: false,
                    error: Some(e.to_string()),
                    report: serde_json::Value::Null,
                },
            };
            if result.passed {
                info!(service = %target.name, manifest = %manifest.display(), "Dependency audit passed");
            } else {
                warn!(
                    service = %target.name,
                    manifest = %manifest.display(),
                    "Dependency audit failed{}",
                    result.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
                );
            }
            manifests.push(result);
        }

        services.push(ServiceCompliance {
            service: target.name.clone(),
            passed: manifests.iter().all(|m| m.passed),
            manifests,
        });
    }

    Ok(ComplianceReport {
        generated_at: Utc::now(),
        environment,
        services,
    })
}

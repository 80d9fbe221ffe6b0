//! Settings file management
//!
//! Settings are read from `settings.json` (every field optional), then
//! overridden from the environment, then from command-line flags.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::health::verdict::GradingThresholds;
use crate::logs::LogLevel;
use crate::rollback::snapshot::check_snapshot_path;

/// Deployment environment mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    #[default]
    Development,
    Staging,
    Production,
}

impl EnvironmentMode {
    /// Package audit failures abort the run only in production
    pub fn compliance_is_fatal(&self) -> bool {
        matches!(self, EnvironmentMode::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentMode::Development => "development",
            EnvironmentMode::Staging => "staging",
            EnvironmentMode::Production => "production",
        }
    }
}

impl fmt::Display for EnvironmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnvironmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentMode::Development),
            "staging" | "stage" => Ok(EnvironmentMode::Staging),
            "production" | "prod" => Ok(EnvironmentMode::Production),
            _ => Err(format!("Invalid environment mode: {}", s)),
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub environment: EnvironmentMode,
    pub platform: PlatformSettings,
    pub engine: EngineSettings,
    pub build: BuildSettings,
    pub readiness: ReadinessSettings,
    pub health: HealthSettings,
    pub auditor: AuditorSettings,
    pub rollback: RollbackSettings,
    pub safeguards: SafeguardSettings,
}

/// Where the platform lives and what it needs on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Compose project name
    pub project_name: String,

    /// Compose file describing every platform service
    pub compose_file: PathBuf,

    /// Root that relative paths (compose file, manifests, snapshots) resolve against
    pub project_root: PathBuf,

    /// Host on which exposed ports are probed
    pub host: String,

    /// Files that must exist before deployment
    pub required_files: Vec<PathBuf>,

    /// Configuration captured by rollback points (files or directories)
    pub snapshot_paths: Vec<PathBuf>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            project_name: "spatial-platform".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_root: PathBuf::from("."),
            host: "localhost".to_string(),
            required_files: vec![PathBuf::from("docker-compose.yml")],
            snapshot_paths: vec![
                PathBuf::from("docker-compose.yml"),
                PathBuf::from(".env"),
                PathBuf::from("infrastructure/monitoring"),
            ],
        }
    }
}

/// Container engine invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Container engine binary
    pub binary: String,

    /// Timeout for lifecycle commands (start, stop, inspect, exec)
    pub command_timeout_secs: u64,

    /// Timeout for a single image build
    pub build_timeout_secs: u64,

    /// Timeout for a single image pull
    pub pull_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            command_timeout_secs: 120,
            build_timeout_secs: 1800,
            pull_timeout_secs: 600,
        }
    }
}

/// Image build scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Sliding window size for the light wave
    pub light_concurrency: usize,

    /// Minimum built/expected ratio for IMAGE_BUILD to succeed
    pub coverage_threshold: f64,

    /// Host memory percentage above which a heavy build waits for a cool-down
    pub heavy_memory_ceiling_percent: f32,

    /// Length of that cool-down
    pub heavy_cooldown_secs: u64,

    /// Pinned tags per external repository, consumed by the image resolver
    pub image_pins: BTreeMap<String, String>,

    /// How long a resolved tag stays cached
    pub resolver_ttl_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            light_concurrency: 3,
            coverage_threshold: 0.70,
            heavy_memory_ceiling_percent: 85.0,
            heavy_cooldown_secs: 30,
            image_pins: BTreeMap::new(),
            resolver_ttl_secs: 3600,
        }
    }
}

/// Bounded retry parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
}

/// Readiness polling and settle windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    pub core: RetrySettings,
    pub app: RetrySettings,
    pub core_settle_secs: u64,
    pub app_settle_secs: u64,
    pub monitoring_settle_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            core: RetrySettings {
                interval_secs: 2,
                max_attempts: 30,
                attempt_timeout_secs: 5,
            },
            app: RetrySettings {
                interval_secs: 2,
                max_attempts: 15,
                attempt_timeout_secs: 5,
            },
            core_settle_secs: 10,
            app_settle_secs: 3,
            monitoring_settle_secs: 5,
        }
    }
}

/// Health and performance validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub probe_timeout_ms: u64,
    pub probe_concurrency: usize,
    pub grading: GradingThresholds,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5000,
            probe_concurrency: 8,
            grading: GradingThresholds::default(),
        }
    }
}

/// External dependency-audit command.
///
/// `{manifest}` in `args` is replaced with the manifest path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AuditorSettings {
    fn default() -> Self {
        Self {
            program: "pip-audit".to_string(),
            args: vec![
                "-r".to_string(),
                "{manifest}".to_string(),
                "-f".to_string(),
                "json".to_string(),
            ],
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackSettings {
    /// Restore the pre-deployment baseline when a service phase fails hard
    pub auto_rollback: bool,
}

/// Safeguards monitor sampling and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardSettings {
    pub interval_secs: u64,
    pub duration_secs: u64,
    pub cpu_warn_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warn_percent: f64,
    pub memory_critical_percent: f64,
    pub max_remediations: u32,
}

impl Default for SafeguardSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            duration_secs: 60,
            cpu_warn_percent: 70.0,
            cpu_critical_percent: 90.0,
            memory_warn_percent: 75.0,
            memory_critical_percent: 90.0,
            max_remediations: 3,
        }
    }
}

impl Settings {
    /// Load settings from `file`; a missing file yields defaults
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        if !file.exists().await {
            debug!(path = %file.path().display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }

        file.read_json::<Settings>().await.map_err(|e| {
            OrchestratorError::ConfigError(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("ENVIRONMENT") {
            self.environment = mode.parse().map_err(OrchestratorError::ConfigError)?;
        }
        if let Some(level) = lookup("SPATIAL_LOG_LEVEL") {
            self.log_level = level.parse().map_err(OrchestratorError::ConfigError)?;
        }
        if let Some(project) = lookup("SPATIAL_PROJECT") {
            self.platform.project_name = project;
        }
        if let Some(compose_file) = lookup("SPATIAL_COMPOSE_FILE") {
            self.platform.compose_file = PathBuf::from(compose_file);
        }
        Ok(())
    }

    /// Reject settings no run could honor
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.build.light_concurrency == 0 {
            return Err(OrchestratorError::ConfigError(
                "build.light_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.build.coverage_threshold) {
            return Err(OrchestratorError::ConfigError(
                "build.coverage_threshold must be within 0..=1".to_string(),
            ));
        }
        if self.health.probe_concurrency == 0 {
            return Err(OrchestratorError::ConfigError(
                "health.probe_concurrency must be at least 1".to_string(),
            ));
        }
        self.health
            .grading
            .validate()
            .map_err(OrchestratorError::ConfigError)?;

        for retry in [&self.readiness.core, &self.readiness.app] {
            if retry.max_attempts == 0 {
                return Err(OrchestratorError::ConfigError(
                    "readiness max_attempts must be at least 1".to_string(),
                ));
            }
        }

        for path in &self.platform.snapshot_paths {
            check_snapshot_path(path).map_err(OrchestratorError::ConfigError)?;
        }

        let s = &self.safeguards;
        if s.interval_secs == 0 {
            return Err(OrchestratorError::ConfigError(
                "safeguards.interval_secs must be at least 1".to_string(),
            ));
        }
        if s.cpu_warn_percent >= s.cpu_critical_percent
            || s.memory_warn_percent >= s.memory_critical_percent
        {
            return Err(OrchestratorError::ConfigError(
                "safeguard warn thresholds must be below critical thresholds".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a path against the project root
    pub fn project_path(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.platform.project_root.join(path)
        }
    }
}

/// Credentials read from the environment, never logged
#[derive(Debug, Default)]
pub struct Credentials {
    values: BTreeMap<String, SecretString>,
}

impl Credentials {
    /// Read every variable in `names` through `lookup`; empty values count as missing
    pub fn load<'a, I, F>(names: I, lookup: F) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&str) -> Option<String>,
    {
        let values = names
            .into_iter()
            .filter_map(|name| {
                lookup(name)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.to_string(), SecretString::from(v)))
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&SecretString> {
        self.values.get(name)
    }

    /// Names from `required` that have no value
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing: Vec<String> = required
            .into_iter()
            .filter(|name| !self.values.contains_key(*name))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&File::new(dir.path().join("settings.json")))
            .await
            .unwrap();
        assert_eq!(settings.build.light_concurrency, 3);
        assert_eq!(settings.build.coverage_threshold, 0.70);
        assert_eq!(settings.environment, EnvironmentMode::Development);
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn test_partial_settings_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"environment": "production", "build": {"light_concurrency": 5}}"#,
        )
        .unwrap();

        let settings = Settings::load(&File::new(path)).await.unwrap();
        assert_eq!(settings.environment, EnvironmentMode::Production);
        assert_eq!(settings.build.light_concurrency, 5);
        assert_eq!(settings.build.coverage_threshold, 0.70);
        assert_eq!(settings.safeguards.interval_secs, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(|key| match key {
                "ENVIRONMENT" => Some("prod".to_string()),
                "SPATIAL_PROJECT" => Some("spatial-staging".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.environment, EnvironmentMode::Production);
        assert_eq!(settings.platform.project_name, "spatial-staging");

        let invalid = settings.apply_env(|key| (key == "ENVIRONMENT").then(|| "qa".to_string()));
        assert!(matches!(invalid, Err(OrchestratorError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_safeguard_thresholds() {
        let mut settings = Settings::default();
        settings.safeguards.cpu_warn_percent = 95.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_snapshot_paths_outside_project() {
        let mut settings = Settings::default();
        settings.platform.snapshot_paths = vec![PathBuf::from("/srv/platform/docker-compose.yml")];
        assert!(matches!(settings.validate(), Err(OrchestratorError::ConfigError(_))));

        settings.platform.snapshot_paths = vec![PathBuf::from("../.env")];
        assert!(settings.validate().is_err());

        settings.platform.snapshot_paths = vec![PathBuf::from("infrastructure/monitoring")];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_credentials_missing_and_redacted() {
        let creds = Credentials::load(["POSTGRES_PASSWORD", "REDIS_PASSWORD"], |name| {
            match name {
                "POSTGRES_PASSWORD" => Some("s3cret".to_string()),
                "REDIS_PASSWORD" => Some("  ".to_string()),
                _ => None,
            }
        });

        assert_eq!(
            creds.missing(["POSTGRES_PASSWORD", "REDIS_PASSWORD", "JWT_SECRET"]),
            vec!["JWT_SECRET".to_string(), "REDIS_PASSWORD".to_string()]
        );
        assert_eq!(
            creds.get("POSTGRES_PASSWORD").unwrap().expose_secret(),
            "s3cret"
        );
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }
}

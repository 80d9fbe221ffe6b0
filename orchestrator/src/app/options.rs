//! Application configuration options
//!
//! Settings are plain serde data; options are what the components consume,
//! with durations and resolved paths.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::audit;
use crate::build::scheduler;
use crate::deploy::engine;
use crate::deploy::prerequisites::{self, ToolRequirement};
use crate::health::retry::RetryPolicy;
use crate::health::validator;
use crate::rollback::manager;
use crate::runtime::docker;
use crate::safeguards::monitor;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{EnvironmentMode, Settings};
use crate::utils::image_architecture;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// State directory layout
    pub layout: StorageLayout,

    pub environment: EnvironmentMode,

    /// Host on which exposed service ports are probed
    pub probe_host: String,

    /// Timeout for a single endpoint probe
    pub probe_timeout: Duration,

    pub docker: docker::Options,

    pub scheduler: scheduler::Options,

    pub resolver: ResolverOptions,

    pub validator: validator::Options,

    pub auditor: audit::Options,

    pub rollback: manager::Options,

    pub safeguards: monitor::Options,

    pub engine: engine::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

/// Image resolver configuration
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Pinned tag per repository
    pub pins: BTreeMap<String, String>,

    /// How long a resolved tag is reused
    pub ttl: Duration,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let platform = &settings.platform;
        let project_root = platform.project_root.clone();

        let docker = docker::Options {
            binary: settings.engine.binary.clone(),
            project_name: platform.project_name.clone(),
            compose_file: settings.project_path(&platform.compose_file),
            project_dir: project_root.clone(),
            command_timeout: Duration::from_secs(settings.engine.command_timeout_secs),
            build_timeout: Duration::from_secs(settings.engine.build_timeout_secs),
            pull_timeout: Duration::from_secs(settings.engine.pull_timeout_secs),
        };

        let prerequisites = prerequisites::Options {
            tools: vec![
                ToolRequirement::new(&docker.binary, &docker.binary, &["--version"], true),
                ToolRequirement::new(
                    &format!("{} compose", docker.binary),
                    &docker.binary,
                    &["compose", "version"],
                    true,
                ),
                ToolRequirement::new(
                    &settings.auditor.program,
                    &settings.auditor.program,
                    &["--version"],
                    false,
                ),
            ],
            required_files: platform
                .required_files
                .iter()
                .map(|f| settings.project_path(f))
                .collect(),
            // filled from the registry once it is loaded
            required_credentials: Vec::new(),
            ..prerequisites::Options::default()
        };

        Self {
            layout,
            environment: settings.environment,
            probe_host: platform.host.clone(),
            probe_timeout: Duration::from_millis(settings.health.probe_timeout_ms),
            docker,
            scheduler: scheduler::Options {
                light_concurrency: settings.build.light_concurrency,
                coverage_threshold: settings.build.coverage_threshold,
                heavy_memory_ceiling_percent: settings.build.heavy_memory_ceiling_percent,
                heavy_cooldown: Duration::from_secs(settings.build.heavy_cooldown_secs),
                architecture: image_architecture().to_string(),
            },
            resolver: ResolverOptions {
                pins: settings.build.image_pins.clone(),
                ttl: Duration::from_secs(settings.build.resolver_ttl_secs),
            },
            validator: validator::Options {
                probe_concurrency: settings.health.probe_concurrency,
                grading: settings.health.grading,
            },
            auditor: audit::Options {
                program: settings.auditor.program.clone(),
                args: settings.auditor.args.clone(),
                timeout: Duration::from_secs(settings.auditor.timeout_secs),
                project_dir: project_root.clone(),
            },
            rollback: manager::Options {
                project_root,
                snapshot_paths: platform.snapshot_paths.clone(),
                revalidation: RetryPolicy::from(&settings.readiness.core),
            },
            safeguards: monitor::Options {
                interval: Duration::from_secs(settings.safeguards.interval_secs),
                duration: Duration::from_secs(settings.safeguards.duration_secs),
                cpu_warn_percent: settings.safeguards.cpu_warn_percent,
                cpu_critical_percent: settings.safeguards.cpu_critical_percent,
                memory_warn_percent: settings.safeguards.memory_warn_percent,
                memory_critical_percent: settings.safeguards.memory_critical_percent,
                max_remediations: settings.safeguards.max_remediations,
            },
            engine: engine::Options {
                environment: settings.environment,
                core_readiness: RetryPolicy::from(&settings.readiness.core),
                app_readiness: RetryPolicy::from(&settings.readiness.app),
                core_settle: Duration::from_secs(settings.readiness.core_settle_secs),
                app_settle: Duration::from_secs(settings.readiness.app_settle_secs),
                monitoring_settle: Duration::from_secs(settings.readiness.monitoring_settle_secs),
                auto_rollback: settings.rollback.auto_rollback,
                rebuild: Default::default(),
                prerequisites,
            },
        }
    }

    /// Paths relative to the project root
    pub fn project_root(&self) -> &PathBuf {
        &self.rollback.project_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_map_onto_component_options() {
        let mut settings = Settings::default();
        settings.platform.project_root = PathBuf::from("/srv/spatial");
        settings.build.light_concurrency = 5;
        settings.safeguards.interval_secs = 2;
        settings.rollback.auto_rollback = true;

        let options = AppOptions::from_settings(&settings, StorageLayout::new("/tmp/state"));
        assert_eq!(options.scheduler.light_concurrency, 5);
        assert_eq!(options.safeguards.interval, Duration::from_secs(2));
        assert!(options.engine.auto_rollback);
        assert_eq!(
            options.docker.compose_file,
            PathBuf::from("/srv/spatial/docker-compose.yml")
        );
        assert_eq!(
            options.engine.prerequisites.required_files,
            vec![PathBuf::from("/srv/spatial/docker-compose.yml")]
        );
        assert_eq!(options.engine.core_readiness.max_attempts, 30);
        assert_eq!(options.project_root(), &PathBuf::from("/srv/spatial"));
    }
}

//! Docker / Docker Compose engine

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::build::ImageBuilder;
use crate::errors::OrchestratorError;
use crate::registry::descriptor::ServiceDescriptor;
use crate::runtime::{ContainerEngine, ContainerState, ExecOutput, ResourceSample};

/// Docker engine options
#[derive(Debug, Clone)]
pub struct Options {
    /// Engine binary
    pub binary: String,

    /// Compose project name
    pub project_name: String,

    /// Compose file
    pub compose_file: PathBuf,

    /// Directory that build contexts resolve against
    pub project_dir: PathBuf,

    /// Timeout for lifecycle commands
    pub command_timeout: Duration,

    /// Timeout for a single image build
    pub build_timeout: Duration,

    /// Timeout for a single image pull
    pub pull_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            project_name: "spatial-platform".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_dir: PathBuf::from("."),
            command_timeout: Duration::from_secs(120),
            build_timeout: Duration::from_secs(1800),
            pull_timeout: Duration::from_secs(600),
        }
    }
}

/// Container engine backed by the Docker CLI
#[derive(Debug, Clone)]
pub struct DockerEngine {
    options: Options,
}

impl DockerEngine {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Whether the engine binary answers at all
    pub async fn available(&self) -> bool {
        self.docker(&["version", "--format", "{{.Server.Version}}"], self.options.command_timeout)
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn docker(&self, args: &[&str], timeout: Duration) -> Result<Output, OrchestratorError> {
        debug!("{} {}", self.options.binary, args.join(" "));
        let mut command = Command::new(&self.options.binary);
        command
            .args(args)
            .current_dir(&self.options.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(OrchestratorError::EngineError(format!(
                "failed to run {}: {}",
                self.options.binary, e
            ))),
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "{} {} after {:?}",
                self.options.binary,
                args.first().unwrap_or(&""),
                timeout
            ))),
        }
    }

    async fn compose(&self, args: &[&str]) -> Result<Output, OrchestratorError> {
        let compose_file = self.options.compose_file.to_string_lossy().to_string();
        let mut full = vec![
            "compose",
            "-p",
            self.options.project_name.as_str(),
            "-f",
            compose_file.as_str(),
        ];
        full.extend_from_slice(args);
        self.docker(&full, self.options.command_timeout).await
    }

    async fn compose_checked(&self, args: &[&str]) -> Result<String, OrchestratorError> {
        let output = self.compose(args).await?;
        if !output.status.success() {
            return Err(OrchestratorError::EngineError(format!(
                "docker compose {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn container_id(&self, service: &str) -> Result<Option<String>, OrchestratorError> {
        let stdout = self.compose_checked(&["ps", "-a", "-q", service]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn running_services(&self) -> Result<Vec<String>, OrchestratorError> {
        let stdout = self
            .compose_checked(&["ps", "--services", "--filter", "status=running"])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn start(&self, service: &str) -> Result<(), OrchestratorError> {
        info!(service, "Starting service");
        self.compose_checked(&["up", "-d", "--no-deps", service])
            .await
            .map(|_| ())
    }

    async fn stop(&self, service: &str) -> Result<(), OrchestratorError> {
        info!(service, "Stopping service");
        self.compose_checked(&["stop", service]).await.map(|_| ())
    }

    async fn restart(&self, service: &str) -> Result<(), OrchestratorError> {
        info!(service, "Restarting service");
        self.compose_checked(&["restart", service]).await.map(|_| ())
    }

    async fn exec(
        &self,
        service: &str,
        command: &[String],
    ) -> Result<ExecOutput, OrchestratorError> {
        let mut args = vec!["exec", "-T", service];
        args.extend(command.iter().map(String::as_str));
        let output = self.compose(&args).await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn inspect(&self, service: &str) -> Result<ContainerState, OrchestratorError> {
        let Some(id) = self.container_id(service).await? else {
            return Ok(ContainerState::absent(service));
        };

        let output = self
            .docker(&["inspect", &id], self.options.command_timeout)
            .await?;
        if !output.status.success() {
            return Ok(ContainerState::absent(service));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(parse_inspect(service, &id, &parsed))
    }

    async fn stats(&self, service: &str) -> Result<ResourceSample, OrchestratorError> {
        let id = self.container_id(service).await?.ok_or_else(|| {
            OrchestratorError::EngineError(format!("no container for {}", service))
        })?;

        let output = self
            .docker(
                &["stats", "--no-stream", "--format", "{{json .}}", &id],
                self.options.command_timeout,
            )
            .await?;
        if !output.status.success() {
            return Err(OrchestratorError::EngineError(format!(
                "docker stats failed for {}: {}",
                service,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        parse_stats(&parsed).ok_or_else(|| {
            OrchestratorError::EngineError(format!("unexpected docker stats output for {}", service))
        })
    }
}

#[async_trait]
impl ImageBuilder for DockerEngine {
    async fn local_digest(&self, image: &str) -> Result<Option<String>, OrchestratorError> {
        let output = self
            .docker(
                &["image", "inspect", "--format", "{{.Id}}", image],
                self.options.command_timeout,
            )
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let digest = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!digest.is_empty()).then_some(digest))
    }

    async fn build(&self, service: &ServiceDescriptor) -> Result<String, OrchestratorError> {
        let context = service.build_context.as_deref().ok_or_else(|| {
            OrchestratorError::BuildError(format!("{} has no build context", service.name))
        })?;
        let context = resolve(&self.options.project_dir, context);
        let image = service.image_ref();
        let context_arg = context.to_string_lossy().to_string();

        info!(service = %service.name, image = %image, "Building image");
        let output = self
            .docker(
                &["build", "-t", &image, &context_arg],
                self.options.build_timeout,
            )
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(OrchestratorError::BuildError(format!(
                "docker build failed for {}: {}",
                service.name,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        self.local_digest(&image).await?.ok_or_else(|| {
            OrchestratorError::BuildError(format!("{} built but not found locally", image))
        })
    }

    async fn pull(&self, image: &str) -> Result<(), OrchestratorError> {
        info!(image, "Pulling image");
        let output = self.docker(&["pull", image], self.options.pull_timeout).await?;
        if !output.status.success() {
            return Err(OrchestratorError::EngineError(format!(
                "docker pull failed for {}: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn parse_inspect(service: &str, id: &str, value: &serde_json::Value) -> ContainerState {
    let container = value.get(0).unwrap_or(value);
    let state = &container["State"];
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);

    ContainerState {
        service: service.to_string(),
        container_id: Some(id.to_string()),
        image: text(&container["Config"]["Image"]),
        image_id: text(&container["Image"]),
        running: state["Running"].as_bool().unwrap_or(false),
        status: text(&state["Status"]).unwrap_or_else(|| "unknown".to_string()),
        started_at: text(&state["StartedAt"]),
    }
}

fn parse_stats(value: &serde_json::Value) -> Option<ResourceSample> {
    let percent = |key: &str| -> Option<f64> {
        value[key].as_str()?.trim().trim_end_matches('%').parse().ok()
    };
    Some(ResourceSample {
        cpu_percent: percent("CPUPerc")?,
        memory_percent: percent("MemPerc")?,
    })
}

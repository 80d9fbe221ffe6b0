//! Service descriptors

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a service's image is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceGroup {
    /// Pre-built image pulled from a registry
    External,
    /// Built locally, cheap
    LightBuild,
    /// Built locally, expensive
    HeavyBuild,
    /// Built or pulled, needs infrastructure services at runtime
    InfraDependent,
}

impl ServiceGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceGroup::External => "external",
            ServiceGroup::LightBuild => "light-build",
            ServiceGroup::HeavyBuild => "heavy-build",
            ServiceGroup::InfraDependent => "infra-dependent",
        }
    }
}

impl fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build cost class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildWeight {
    Minimal,
    Light,
    Medium,
    Heavy,
    VeryHeavy,
}

impl BuildWeight {
    /// Heavy builds run one at a time in the heavy wave
    pub fn is_heavy(&self) -> bool {
        matches!(self, BuildWeight::Heavy | BuildWeight::VeryHeavy)
    }
}

/// Which deployment phase starts the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTier {
    Core,
    App,
    Monitoring,
}

/// How readiness is established after start
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// Container running is enough
    #[default]
    Running,
    /// Health path answers with success
    Http,
    /// Command run inside the container exits 0
    Command { command: Vec<String> },
}

/// Automated response to critical resource load
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Remediation {
    #[default]
    None,
    Restart,
    /// In-container command such as a cache purge
    Exec { action: String, command: Vec<String> },
}

/// Static description of one platform service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique logical name (also the compose service name)
    pub name: String,

    pub group: ServiceGroup,

    pub tier: DeployTier,

    pub weight: BuildWeight,

    /// Host-exposed port
    #[serde(default)]
    pub port: Option<u16>,

    /// Port inside the container network, for internal probes
    #[serde(default)]
    pub container_port: Option<u16>,

    #[serde(default)]
    pub health_path: Option<String>,

    /// Maximum acceptable health response time
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Services that must be healthy first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Not reachable from the host; probed in-network
    #[serde(default)]
    pub internal: bool,

    /// Critical services never receive automated restarts
    #[serde(default)]
    pub critical: bool,

    #[serde(default)]
    pub readiness: Readiness,

    #[serde(default)]
    pub remediation: Remediation,

    /// Image reference; repository for external services, local tag otherwise
    #[serde(default)]
    pub image: Option<String>,

    /// Docker build context for locally built services
    #[serde(default)]
    pub build_context: Option<PathBuf>,

    /// Dependency manifests audited during package validation
    #[serde(default)]
    pub manifests: Vec<PathBuf>,

    /// Environment variables that must hold credentials
    #[serde(default)]
    pub credentials: Vec<String>,
}

fn default_max_latency_ms() -> u64 {
    1000
}

impl ServiceDescriptor {
    /// Minimal descriptor; the catalog and tests fill in the rest
    pub fn new(name: &str, group: ServiceGroup, tier: DeployTier, weight: BuildWeight) -> Self {
        Self {
            name: name.to_string(),
            group,
            tier,
            weight,
            port: None,
            container_port: None,
            health_path: None,
            max_latency_ms: default_max_latency_ms(),
            depends_on: Vec::new(),
            internal: false,
            critical: false,
            readiness: Readiness::Running,
            remediation: Remediation::None,
            image: None,
            build_context: None,
            manifests: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self.container_port.get_or_insert(port);
        self
    }

    pub fn container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    pub fn health(mut self, path: &str, max_latency_ms: u64) -> Self {
        self.health_path = Some(path.to_string());
        self.max_latency_ms = max_latency_ms;
        if self.readiness == Readiness::Running {
            self.readiness = Readiness::Http;
        }
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn readiness_command(mut self, command: &[&str]) -> Self {
        self.readiness = Readiness::Command {
            command: command.iter().map(|c| c.to_string()).collect(),
        };
        self
    }

    pub fn remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = remediation;
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    pub fn build_context(mut self, path: &str) -> Self {
        self.build_context = Some(PathBuf::from(path));
        self
    }

    pub fn manifest(mut self, path: &str) -> Self {
        self.manifests.push(PathBuf::from(path));
        self
    }

    pub fn credentials(mut self, names: &[&str]) -> Self {
        self.credentials = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Whether the image is produced by a local build
    pub fn requires_build(&self) -> bool {
        match self.group {
            ServiceGroup::LightBuild | ServiceGroup::HeavyBuild => true,
            ServiceGroup::InfraDependent => self.build_context.is_some(),
            ServiceGroup::External => false,
        }
    }

    /// Image reference used for builds and runs
    pub fn image_ref(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("spatial/{}:latest", self.name))
    }

    /// The port a probe should target: host port, or container port for internal services
    pub fn probe_port(&self) -> Option<u16> {
        if self.internal {
            self.container_port.or(self.port)
        } else {
            self.port
        }
    }
}

/// Declared latency threshold for one health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceThreshold {
    pub service: String,
    pub port: u16,
    pub path: String,
    pub max_latency_ms: u64,
    /// Probe through the container network instead of the host port
    pub internal: bool,
}

impl PerformanceThreshold {
    pub fn new(service: &str, port: u16, path: &str, max_latency_ms: u64) -> Self {
        Self {
            service: service.to_string(),
            port,
            path: path.to_string(),
            max_latency_ms,
            internal: false,
        }
    }
}

//! Endpoint probes
//!
//! Host-exposed endpoints are probed over HTTP from the orchestrator. Internal
//! services have no host port, so the same request is issued from inside the
//! service's container through the engine's exec path. Both report success and
//! elapsed time the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::OrchestratorError;
use crate::registry::descriptor::PerformanceThreshold;
use crate::runtime::ContainerEngine;

/// One request to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service: String,
    pub port: u16,
    pub path: String,
    pub internal: bool,
}

impl From<&PerformanceThreshold> for ProbeTarget {
    fn from(threshold: &PerformanceThreshold) -> Self {
        Self {
            service: threshold.service.clone(),
            port: threshold.port,
            path: threshold.path.clone(),
            internal: threshold.internal,
        }
    }
}

/// What a probe observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn ok(latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            success: true,
            latency_ms: latency.as_millis() as u64,
            status_code,
            error: None,
        }
    }

    pub fn failed(latency: Duration, status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms: latency.as_millis() as u64,
            status_code,
            error: Some(error.into()),
        }
    }
}

/// Issues one bounded-timeout request per call; never errors, failures are results
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

/// Prober for the real platform
pub struct EndpointProber {
    client: Client,
    host: String,
    timeout: Duration,
    engine: Arc<dyn ContainerEngine>,
}

impl EndpointProber {
    pub fn new(
        host: &str,
        timeout: Duration,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self, OrchestratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.to_string(),
            timeout,
            engine,
        })
    }

    async fn probe_http(&self, url: Url) -> ProbeResult {
        let started = Instant::now();
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                let elapsed = started.elapsed();
                if status.is_success() {
                    ProbeResult::ok(elapsed, Some(status.as_u16()))
                } else {
                    ProbeResult::failed(elapsed, Some(status.as_u16()), format!("HTTP {}", status))
                }
            }
            Err(e) => {
                debug!(url = %url, "probe failed: {}", e);
                ProbeResult::failed(started.elapsed(), None, e.to_string())
            }
        }
    }

    async fn probe_in_network(&self, target: &ProbeTarget) -> ProbeResult {
        let command = in_network_command(target, self.timeout);
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.timeout + Duration::from_secs(1),
            self.engine.exec(&target.service, &command),
        )
        .await;
        let elapsed = started.elapsed();

        match result {
            Ok(Ok(output)) => {
                let (code, measured) = parse_curl_report(&output.stdout);
                // curl's own timing excludes exec startup in the engine
                let latency = measured.unwrap_or(elapsed);
                match code {
                    Some(code) if output.success() && (200..300).contains(&code) => {
                        ProbeResult::ok(latency, Some(code))
                    }
                    _ => ProbeResult::failed(
                        latency,
                        code,
                        format!("in-network probe exited {}", output.exit_code),
                    ),
                }
            }
            Ok(Err(e)) => ProbeResult::failed(elapsed, None, e.to_string()),
            Err(_) => ProbeResult::failed(elapsed, None, "in-network probe timed out"),
        }
    }
}

#[async_trait]
impl Prober for EndpointProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        if target.internal {
            return self.probe_in_network(target).await;
        }
        match endpoint_url(&self.host, target.port, &target.path) {
            Ok(url) => self.probe_http(url).await,
            Err(e) => ProbeResult::failed(Duration::ZERO, None, e.to_string()),
        }
    }
}

/// URL of a host-exposed health endpoint
pub fn endpoint_url(host: &str, port: u16, path: &str) -> Result<Url, OrchestratorError> {
    let base = Url::parse(&format!("http://{}:{}/", host, port))
        .map_err(|e| OrchestratorError::ConfigError(format!("invalid probe host {}: {}", host, e)))?;
    base.join(path.trim_start_matches('/'))
        .map_err(|e| OrchestratorError::ConfigError(format!("invalid health path {}: {}", path, e)))
}

/// Command that prints the HTTP status and request time from inside the container
fn in_network_command(target: &ProbeTarget, timeout: Duration) -> Vec<String> {
    vec![
        "curl".to_string(),
        "-s".to_string(),
        "-o".to_string(),
        "/dev/null".to_string(),
        "-w".to_string(),
        "%{http_code} %{time_total}".to_string(),
        "--max-time".to_string(),
        timeout.as_secs().max(1).to_string(),
        format!("http://localhost:{}/{}", target.port, target.path.trim_start_matches('/')),
    ]
}

/// Status code and in-container request time from `%{http_code} %{time_total}`
fn parse_curl_report(stdout: &str) -> (Option<u16>, Option<Duration>) {
    let mut fields = stdout.split_whitespace();
    let code = fields.next().and_then(|c| c.parse::<u16>().ok());
    let time = fields
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t >= 0.0)
        .map(Duration::from_secs_f64);
    (code, time)
}

//! Health and performance validation

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::health::probe::{ProbeResult, ProbeTarget, Prober};
use crate::health::verdict::{grade, GradingThresholds, Verdict};
use crate::registry::descriptor::PerformanceThreshold;
use crate::runtime::ContainerEngine;
use crate::utils::ratio;

/// Validator options
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum probes in flight
    pub probe_concurrency: usize,

    pub grading: GradingThresholds,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            probe_concurrency: 8,
            grading: GradingThresholds::default(),
        }
    }
}

/// Outcome of one endpoint probe against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleVerdict {
    Pass,
    /// Answered successfully but slower than allowed
    ThresholdExceeded,
    Unreachable,
    NotRunning,
}

impl SampleVerdict {
    pub fn classify(result: &ProbeResult, max_latency_ms: u64, running: bool) -> Self {
        match (result.success, running) {
            (true, _) if result.latency_ms <= max_latency_ms => SampleVerdict::Pass,
            (true, _) => SampleVerdict::ThresholdExceeded,
            (false, false) => SampleVerdict::NotRunning,
            (false, true) => SampleVerdict::Unreachable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub port: u16,
    pub path: String,
    pub success: bool,
    pub latency_ms: u64,
    pub threshold_ms: u64,
    pub verdict: SampleVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthSample {
    fn new(threshold: &PerformanceThreshold, result: ProbeResult, running: bool) -> Self {
        Self {
            service: threshold.service.clone(),
            timestamp: Utc::now(),
            port: threshold.port,
            path: threshold.path.clone(),
            verdict: SampleVerdict::classify(&result, threshold.max_latency_ms, running),
            success: result.success,
            latency_ms: result.latency_ms,
            threshold_ms: threshold.max_latency_ms,
            error: result.error,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == SampleVerdict::Pass
    }
}

/// Aggregated result of a validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVerdict {
    pub verdict: Verdict,
    pub service_ratio: f64,
    pub endpoint_ratio: f64,
    pub services_total: usize,
    pub services_running: usize,
    pub endpoints_probed: usize,
    pub endpoints_passing: usize,
    pub not_running: Vec<String>,
    pub samples: Vec<HealthSample>,
    pub checked_at: DateTime<Utc>,
}

impl DeploymentVerdict {
    /// Human-readable slow-endpoint findings
    pub fn performance_issues(&self) -> Vec<String> {
        self.samples
            .iter()
            .filter(|s| s.verdict == SampleVerdict::ThresholdExceeded)
            .map(|s| {
                format!(
                    "{} {}:{} responded in {}ms (threshold {}ms)",
                    s.service, s.path, s.port, s.latency_ms, s.threshold_ms
                )
            })
            .collect()
    }

    /// Services with at least one unreachable or not-running endpoint
    pub fn failing_endpoints(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .samples
            .iter()
            .filter(|s| matches!(s.verdict, SampleVerdict::Unreachable | SampleVerdict::NotRunning))
            .map(|s| s.service.as_str())
            .collect();
        set.into_iter().map(str::to_string).collect()
    }
}

pub struct Validator {
    engine: Arc<dyn ContainerEngine>,
    prober: Arc<dyn Prober>,
    options: Options,
}

impl Validator {
    pub fn new(engine: Arc<dyn ContainerEngine>, prober: Arc<dyn Prober>, options: Options) -> Self {
        Self {
            engine,
            prober,
            options,
        }
    }

    /// Check which `services` run, probe every threshold belonging to them, grade
    pub async fn validate(
        &self,
        services: &[String],
        thresholds: &[PerformanceThreshold],
    ) -> DeploymentVerdict {
        let concurrency = self.options.probe_concurrency.max(1);

        let running: BTreeSet<String> = stream::iter(services.iter().cloned())
            .map(|service| async move {
                let running = match self.engine.is_running(&service).await {
                    Ok(running) => running,
                    Err(e) => {
                        warn!(service = %service, "Running check failed: {}", e);
                        false
                    }
                };
                (service, running)
            })
            .buffer_unordered(concurrency)
            .filter_map(|(service, running)| async move { running.then_some(service) })
            .collect()
            .await;

        let in_scope: Vec<&PerformanceThreshold> = thresholds
            .iter()
            .filter(|t| services.contains(&t.service))
            .collect();

        let mut samples: Vec<HealthSample> = stream::iter(in_scope)
            .map(|threshold| {
                let is_running = running.contains(&threshold.service);
                async move {
                    let result = self.prober.probe(&ProbeTarget::from(threshold)).await;
                    HealthSample::new(threshold, result, is_running)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        samples.sort_by(|a, b| a.service.cmp(&b.service).then(a.path.cmp(&b.path)));

        for sample in &samples {
            debug!(
                service = %sample.service,
                path = %sample.path,
                latency_ms = sample.latency_ms,
                threshold_ms = sample.threshold_ms,
                verdict = ?sample.verdict,
                "endpoint sampled"
            );
        }

        let services_running = services.iter().filter(|s| running.contains(*s)).count();
        let endpoints_passing = samples.iter().filter(|s| s.passed()).count();
        let service_ratio = ratio(services_running, services.len(), 0.0);
        let endpoint_ratio = ratio(endpoints_passing, samples.len(), 1.0);
        let verdict = grade(service_ratio, endpoint_ratio, &self.options.grading);

        info!(
            verdict = %verdict,
            services = %format!("{}/{}", services_running, services.len()),
            endpoints = %format!("{}/{}", endpoints_passing, samples.len()),
            "Deployment graded"
        );

        DeploymentVerdict {
            verdict,
            service_ratio,
            endpoint_ratio,
            services_total: services.len(),
            services_running,
            endpoints_probed: samples.len(),
            endpoints_passing,
            not_running: services
                .iter()
                .filter(|s| !running.contains(*s))
                .cloned()
                .collect(),
            samples,
            checked_at: Utc::now(),
        }
    }

    /// Probe a single endpoint against a threshold
    pub async fn check_endpoint(&self, threshold: &PerformanceThreshold) -> HealthSample {
        let running = self
            .engine
            .is_running(&threshold.service)
            .await
            .unwrap_or(false);
        let result = self.prober.probe(&ProbeTarget::from(threshold)).await;
        HealthSample::new(threshold, result, running)
    }
}

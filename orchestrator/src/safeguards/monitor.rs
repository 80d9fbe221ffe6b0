//! Resource safeguards monitor
//!
//! Samples one service's CPU, memory and response time at a fixed interval
//! for a bounded window. A critical event is a run of consecutive critical
//! samples of one resource; remediation fires when an event begins, never
//! again while it lasts. The loop always runs to the end of its window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::OrchestratorError;
use crate::health::probe::{ProbeTarget, Prober};
use crate::registry::descriptor::{Remediation, ServiceDescriptor};
use crate::registry::ServiceRegistry;
use crate::rollback::manager::RollbackManager;
use crate::rollback::snapshot::RollbackTargets;
use crate::runtime::ContainerEngine;
use crate::storage::audit::AuditTrail;
use crate::telemetry::{sample_host_metrics, HostMetrics};

/// Monitor options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
    pub duration: Duration,
    pub cpu_warn_percent: f64,
    pub cpu_critical_percent: f64,
    pub memory_warn_percent: f64,
    pub memory_critical_percent: f64,
    /// Remediations allowed per run
    pub max_remediations: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            duration: Duration::from_secs(60),
            cpu_warn_percent: 70.0,
            cpu_critical_percent: 90.0,
            memory_warn_percent: 75.0,
            memory_critical_percent: 90.0,
            max_remediations: 3,
        }
    }
}

impl Options {
    /// Number of samples in the window, at least one
    pub fn sample_count(&self) -> u64 {
        let interval = self.interval.as_millis().max(1);
        ((self.duration.as_millis() / interval) as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Memory,
    ResponseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// What the monitor did about an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseAction {
    /// Warning, or a critical sample inside an ongoing event
    None,
    /// Critical service or no remediation policy
    AlertOnly,
    Restarted,
    Exec { action: String },
    RemediationFailed { error: String },
    CapReached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub resource: Resource,
    pub level: AlertLevel,
    pub value: f64,
    pub threshold: f64,
    pub action: ResponseAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSample {
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub response_ms: Option<u64>,
}

impl MonitoringSample {
    pub fn missing(&self) -> bool {
        self.cpu_percent.is_none() && self.memory_percent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub service: String,
    pub critical_service: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub samples: u64,
    pub missing_samples: u64,
    pub critical_samples: u64,
    pub critical_events: u64,
    pub remediations: u32,
    pub peak_cpu_percent: Option<f64>,
    pub peak_memory_percent: Option<f64>,
    pub peak_response_ms: Option<u64>,
    pub alerts: Vec<Alert>,
    /// Created on the first critical event
    pub rollback_point: Option<String>,
    pub host: HostMetrics,
}

fn classify(value: f64, warn: f64, critical: f64) -> Option<AlertLevel> {
    if value >= critical {
        Some(AlertLevel::Critical)
    } else if value >= warn {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}

/// Mutable bookkeeping for one monitoring run
struct RunState {
    in_critical_cpu: bool,
    in_critical_memory: bool,
    remediations: u32,
    critical_samples: u64,
    critical_events: u64,
    missing_samples: u64,
    alerts: Vec<Alert>,
    rollback_point: Option<String>,
    peak_cpu: Option<f64>,
    peak_memory: Option<f64>,
    peak_response: Option<u64>,
}

pub struct SafeguardsMonitor {
    engine: Arc<dyn ContainerEngine>,
    prober: Arc<dyn Prober>,
    registry: Arc<ServiceRegistry>,
    rollback: Option<Arc<RollbackManager>>,
    audit: Option<Arc<AuditTrail>>,
    options: Options,
}

impl SafeguardsMonitor {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        prober: Arc<dyn Prober>,
        registry: Arc<ServiceRegistry>,
        options: Options,
    ) -> Self {
        Self {
            engine,
            prober,
            registry,
            rollback: None,
            audit: None,
            options,
        }
    }

    pub fn with_rollback(mut self, rollback: Arc<RollbackManager>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record<T: Serialize>(&self, kind: &str, payload: &T) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(kind, payload) {
                warn!("Failed to write audit entry: {}", e);
            }
        }
    }

    /// Monitor `service` for the configured window
    pub async fn run(&self, service: &str) -> Result<MonitorSummary, OrchestratorError> {
        let descriptor = self.registry.describe(service)?.clone();
        let samples = self.options.sample_count();
        let started_at = Utc::now();
        info!(
            service,
            samples,
            interval = ?self.options.interval,
            critical = descriptor.critical,
            "Safeguards monitor started"
        );

        let mut state = RunState {
            in_critical_cpu: false,
            in_critical_memory: false,
            remediations: 0,
            critical_samples: 0,
            critical_events: 0,
            missing_samples: 0,
            alerts: Vec::new(),
            rollback_point: None,
            peak_cpu: None,
            peak_memory: None,
            peak_response: None,
        };

        for i in 0..samples {
            let sample = self.take_sample(&descriptor, &mut state).await;
            self.record("monitor_sample", &sample);
            self.evaluate(&descriptor, &sample, &mut state).await;

            if i + 1 < samples {
                tokio::time::sleep(self.options.interval).await;
            }
        }

        let summary = MonitorSummary {
            service: service.to_string(),
            critical_service: descriptor.critical,
            started_at,
            finished_at: Utc::now(),
            samples,
            missing_samples: state.missing_samples,
            critical_samples: state.critical_samples,
            critical_events: state.critical_events,
            remediations: state.remediations,
            peak_cpu_percent: state.peak_cpu,
            peak_memory_percent: state.peak_memory,
            peak_response_ms: state.peak_response,
            alerts: state.alerts,
            rollback_point: state.rollback_point,
            host: sample_host_metrics().await,
        };
        self.record("monitor_summary", &summary);
        info!(
            service,
            critical_events = summary.critical_events,
            remediations = summary.remediations,
            alerts = summary.alerts.len(),
            missing = summary.missing_samples,
            "Safeguards monitor finished"
        );
        Ok(summary)
    }

    async fn take_sample(&self, service: &ServiceDescriptor, state: &mut RunState) -> MonitoringSample {
        let (cpu_percent, memory_percent) = match self.engine.stats(&service.name).await {
            Ok(stats) => (Some(stats.cpu_percent), Some(stats.memory_percent)),
            Err(e) => {
                warn!(service = %service.name, "Resource sample missing: {}", e);
                (None, None)
            }
        };

        let response_ms = match (service.probe_port(), &service.health_path) {
            (Some(port), Some(path)) => {
                let result = self
                    .prober
                    .probe(&ProbeTarget {
                        service: service.name.clone(),
                        port,
                        path: path.clone(),
                        internal: service.internal,
                    })
                    .await;
                result.success.then_some(result.latency_ms)
            }
            _ => None,
        };

        let sample = MonitoringSample {
            service: service.name.clone(),
            timestamp: Utc::now(),
            cpu_percent,
            memory_percent,
            response_ms,
        };
        if sample.missing() {
            state.missing_samples += 1;
        }
        state.peak_cpu = max_opt(state.peak_cpu, cpu_percent);
        state.peak_memory = max_opt(state.peak_memory, memory_percent);
        state.peak_response = state.peak_response.max(response_ms);
        sample
    }

    async fn evaluate(&self, service: &ServiceDescriptor, sample: &MonitoringSample, state: &mut RunState) {
        let mut pending: Vec<Alert> = Vec::new();
        let mut event_started = false;
        let mut critical_sample = false;

        let checks = [
            (
                Resource::Cpu,
                sample.cpu_percent,
                self.options.cpu_warn_percent,
                self.options.cpu_critical_percent,
            ),
            (
                Resource::Memory,
                sample.memory_percent,
                self.options.memory_warn_percent,
                self.options.memory_critical_percent,
            ),
        ];

        for (resource, value, warn_at, critical_at) in checks {
            // missing samples leave event state untouched
            let Some(value) = value else { continue };
            let in_event = match resource {
                Resource::Cpu => &mut state.in_critical_cpu,
                _ => &mut state.in_critical_memory,
            };
            let level = classify(value, warn_at, critical_at);

            if level == Some(AlertLevel::Critical) {
                critical_sample = true;
                if !*in_event {
                    *in_event = true;
                    event_started = true;
                    state.critical_events += 1;
                }
            } else {
                *in_event = false;
            }

            if let Some(level) = level {
                pending.push(Alert {
                    service: service.name.clone(),
                    timestamp: sample.timestamp,
                    resource,
                    level,
                    value,
                    threshold: if level == AlertLevel::Critical { critical_at } else { warn_at },
                    action: ResponseAction::None,
                });
            }
        }

        if let Some(response_ms) = sample.response_ms {
            if response_ms > service.max_latency_ms {
                pending.push(Alert {
                    service: service.name.clone(),
                    timestamp: sample.timestamp,
                    resource: Resource::ResponseTime,
                    level: AlertLevel::Warning,
                    value: response_ms as f64,
                    threshold: service.max_latency_ms as f64,
                    action: ResponseAction::None,
                });
            }
        }

        if critical_sample {
            state.critical_samples += 1;
        }

        if event_started {
            if state.rollback_point.is_none() {
                state.rollback_point = self.create_rollback_point(service).await;
            }
            let action = self.respond(service, state).await;
            if let Some(alert) = pending
                .iter_mut()
                .find(|a| a.level == AlertLevel::Critical)
            {
                alert.action = action;
            }
        }

        for alert in pending {
            match alert.level {
                AlertLevel::Critical => error!(
                    service = %alert.service,
                    resource = ?alert.resource,
                    value = alert.value,
                    threshold = alert.threshold,
                    action = ?alert.action,
                    "Critical resource alert"
                ),
                AlertLevel::Warning => warn!(
                    service = %alert.service,
                    resource = ?alert.resource,
                    value = alert.value,
                    threshold = alert.threshold,
                    "Resource warning"
                ),
            }
            self.record("monitor_alert", &alert);
            state.alerts.push(alert);
        }
    }

    /// Automated response on entry into a critical event
    async fn respond(&self, service: &ServiceDescriptor, state: &mut RunState) -> ResponseAction {
        if service.critical {
            return ResponseAction::AlertOnly;
        }
        if matches!(service.remediation, Remediation::None) {
            return ResponseAction::AlertOnly;
        }
        if state.remediations >= self.options.max_remediations {
            warn!(service = %service.name, "Remediation cap reached, alerting only");
            return ResponseAction::CapReached;
        }
        state.remediations += 1;

        match &service.remediation {
            Remediation::Restart => match self.engine.restart(&service.name).await {
                Ok(()) => ResponseAction::Restarted,
                Err(e) => ResponseAction::RemediationFailed {
                    error: e.to_string(),
                },
            },
            Remediation::Exec { action, command } => {
                match self.engine.exec(&service.name, command).await {
                    Ok(output) if output.success() => ResponseAction::Exec {
                        action: action.clone(),
                    },
                    Ok(output) => ResponseAction::RemediationFailed {
                        error: format!("{} exited {}", action, output.exit_code),
                    },
                    Err(e) => ResponseAction::RemediationFailed {
                        error: e.to_string(),
                    },
                }
            }
            Remediation::None => ResponseAction::AlertOnly,
        }
    }

    async fn create_rollback_point(&self, service: &ServiceDescriptor) -> Option<String> {
        let rollback = self.rollback.as_ref()?;
        let description = format!("safeguards: critical load on {}", service.name);
        match rollback
            .create_point(&description, RollbackTargets::Services(vec![service.name.clone()]))
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(service = %service.name, "Could not create rollback point: {}", e);
                None
            }
        }
    }
}

fn max_opt(current: Option<f64>, value: Option<f64>) -> Option<f64> {
    match (current, value) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_two_tiers() {
        assert_eq!(classify(69.9, 70.0, 90.0), None);
        assert_eq!(classify(70.0, 70.0, 90.0), Some(AlertLevel::Warning));
        assert_eq!(classify(95.0, 70.0, 90.0), Some(AlertLevel::Critical));
    }

    #[test]
    fn test_sample_count() {
        assert_eq!(Options::default().sample_count(), 12);
        let short = Options {
            duration: Duration::from_secs(1),
            ..Options::default()
        };
        assert_eq!(short.sample_count(), 1);
    }

    #[test]
    fn test_max_opt() {
        assert_eq!(max_opt(None, Some(3.0)), Some(3.0));
        assert_eq!(max_opt(Some(5.0), Some(3.0)), Some(5.0));
        assert_eq!(max_opt(Some(5.0), None), Some(5.0));
    }
}

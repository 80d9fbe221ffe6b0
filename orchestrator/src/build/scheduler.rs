//! Build scheduler
//!
//! Light builds run in a sliding window of at most `light_concurrency`
//! spawned tasks: when the window is full the oldest in-flight build is
//! awaited before the next one starts. Heavy builds follow, strictly one at a
//! time, each preceded by a memory pressure check.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::build::cache::BuildCache;
use crate::build::resolver::{image_reference, ImageResolver};
use crate::build::{BuildOutcome, BuildReport, BuildTask, BuildWave, ImageBuilder, WaveSummary};
use crate::registry::descriptor::ServiceDescriptor;
use crate::registry::ServiceRegistry;
use crate::telemetry;
use crate::utils::ratio;

/// Scheduler options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sliding window size for the light wave
    pub light_concurrency: usize,

    /// Minimum built/expected ratio
    pub coverage_threshold: f64,

    /// Memory percentage above which a heavy build waits
    pub heavy_memory_ceiling_percent: f32,

    /// How long it waits
    pub heavy_cooldown: Duration,

    /// Architecture used for resolver and cache keys
    pub architecture: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            light_concurrency: 3,
            coverage_threshold: 0.70,
            heavy_memory_ceiling_percent: 85.0,
            heavy_cooldown: Duration::from_secs(30),
            architecture: crate::utils::image_architecture().to_string(),
        }
    }
}

type MemoryProbe = Arc<dyn Fn() -> f32 + Send + Sync>;

pub struct BuildScheduler {
    builder: Arc<dyn ImageBuilder>,
    resolver: Arc<dyn ImageResolver>,
    cache: Arc<BuildCache>,
    options: Options,
    attempts: AtomicU64,
    memory_probe: MemoryProbe,
}

impl BuildScheduler {
    pub fn new(
        builder: Arc<dyn ImageBuilder>,
        resolver: Arc<dyn ImageResolver>,
        cache: Arc<BuildCache>,
        options: Options,
    ) -> Self {
        Self {
            builder,
            resolver,
            cache,
            options,
            attempts: AtomicU64::new(0),
            memory_probe: Arc::new(telemetry::memory_pressure),
        }
    }

    /// Replace the host memory sampler
    pub fn with_memory_probe(mut self, probe: impl Fn() -> f32 + Send + Sync + 'static) -> Self {
        self.memory_probe = Arc::new(probe);
        self
    }

    fn next_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make every image the registry needs available locally.
    ///
    /// Services in `rebuild` are built even when their image is present.
    pub async fn run(&self, registry: &ServiceRegistry, rebuild: &BTreeSet<String>) -> BuildReport {
        let (pulled, pull_failures) = self.pull_prebuilt(registry).await;

        let expected = registry.build_required();
        let mut skipped = Vec::new();
        let mut light = Vec::new();
        let mut heavy = Vec::new();

        for service in &expected {
            if !rebuild.contains(&service.name) {
                match self.builder.local_digest(&service.image_ref()).await {
                    Ok(Some(digest)) => {
                        self.cache
                            .record(&service.name, &self.options.architecture, &digest);
                        skipped.push(service.name.clone());
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(service = %service.name, "Image lookup failed: {}", e),
                }
            }
            if service.weight.is_heavy() {
                heavy.push((*service).clone());
            } else {
                light.push((*service).clone());
            }
        }

        info!(
            expected = expected.len(),
            skipped = skipped.len(),
            light = light.len(),
            heavy = heavy.len(),
            "Build plan ready"
        );

        let light_wave = self.run_light_wave(light).await;
        let heavy_wave = self.run_heavy_wave(heavy).await;

        if let Err(e) = self.cache.persist().await {
            warn!("Failed to persist build cache: {}", e);
        }

        let waves = vec![light_wave, heavy_wave];
        let failed: Vec<String> = waves
            .iter()
            .flat_map(|w| w.tasks.iter())
            .filter(|t| !t.succeeded())
            .map(|t| t.service.clone())
            .collect();
        let built = skipped.len()
            + waves
                .iter()
                .map(WaveSummary::succeeded_count)
                .sum::<usize>();
        let coverage = ratio(built, expected.len(), 1.0);

        let report = BuildReport {
            expected: expected.len(),
            built,
            skipped,
            failed,
            coverage,
            threshold: self.options.coverage_threshold,
            waves,
            pulled,
            pull_failures,
        };

        if report.passed() {
            info!(
                coverage = %format!("{:.0}%", coverage * 100.0),
                built, expected = report.expected, "Image build coverage"
            );
        } else {
            error!(
                coverage = %format!("{:.0}%", coverage * 100.0),
                built, expected = report.expected, "Image build coverage below threshold"
            );
        }
        report
    }

    async fn pull_prebuilt(&self, registry: &ServiceRegistry) -> (Vec<String>, Vec<String>) {
        let arch = self.options.architecture.as_str();
        let results: Vec<(String, bool)> = stream::iter(registry.prebuilt())
            .map(|service| async move {
                let repository = service.image_ref();
                let reference = match self.resolver.resolve(&repository, arch).await {
                    Ok(tag) => image_reference(&repository, &tag),
                    Err(e) => {
                        warn!(service = %service.name, "Image resolution failed: {}", e);
                        return (service.name.clone(), false);
                    }
                };
                if let Ok(Some(_)) = self.builder.local_digest(&reference).await {
                    return (service.name.clone(), true);
                }
                match self.builder.pull(&reference).await {
                    Ok(()) => (service.name.clone(), true),
                    Err(e) => {
                        warn!(service = %service.name, image = %reference, "Pull failed: {}", e);
                        (service.name.clone(), false)
                    }
                }
            })
            .buffer_unordered(self.options.light_concurrency.max(1))
            .collect()
            .await;

        let mut pulled = Vec::new();
        let mut failures = Vec::new();
        for (name, ok) in results {
            if ok {
                pulled.push(name);
            } else {
                failures.push(name);
            }
        }
        pulled.sort();
        failures.sort();
        (pulled, failures)
    }

    async fn run_light_wave(&self, services: Vec<ServiceDescriptor>) -> WaveSummary {
        let window_size = self.options.light_concurrency.max(1);
        let mut window: VecDeque<(String, JoinHandle<BuildTask>)> = VecDeque::new();
        let mut tasks = Vec::with_capacity(services.len());

        for service in services {
            if window.len() == window_size {
                if let Some((name, handle)) = window.pop_front() {
                    tasks.push(join_build(name, handle).await);
                }
            }

            let name = service.name.clone();
            let attempt = self.next_attempt();
            let builder = self.builder.clone();
            let cache = self.cache.clone();
            let arch = self.options.architecture.clone();
            let handle = tokio::spawn(async move {
                build_one(builder, cache, service, attempt, BuildWave::Light, arch).await
            });
            window.push_back((name, handle));
        }

        while let Some((name, handle)) = window.pop_front() {
            tasks.push(join_build(name, handle).await);
        }

        log_wave(BuildWave::Light, &tasks);
        WaveSummary {
            wave: BuildWave::Light,
            tasks,
        }
    }

    async fn run_heavy_wave(&self, services: Vec<ServiceDescriptor>) -> WaveSummary {
        let mut tasks = Vec::with_capacity(services.len());

        for service in services {
            let pressure = (self.memory_probe)();
            if pressure > self.options.heavy_memory_ceiling_percent {
                warn!(
                    service = %service.name,
                    memory_percent = pressure,
                    cooldown = ?self.options.heavy_cooldown,
                    "Memory pressure high, cooling down before heavy build"
                );
                tokio::time::sleep(self.options.heavy_cooldown).await;
            }

            let attempt = self.next_attempt();
            tasks.push(
                build_one(
                    self.builder.clone(),
                    self.cache.clone(),
                    service,
                    attempt,
                    BuildWave::Heavy,
                    self.options.architecture.clone(),
                )
                .await,
            );
        }

        log_wave(BuildWave::Heavy, &tasks);
        WaveSummary {
            wave: BuildWave::Heavy,
            tasks,
        }
    }
}

async fn build_one(
    builder: Arc<dyn ImageBuilder>,
    cache: Arc<BuildCache>,
    service: ServiceDescriptor,
    attempt: u64,
    wave: BuildWave,
    arch: String,
) -> BuildTask {
    let started_at = Utc::now();
    let started = Instant::now();
    info!(service = %service.name, attempt, wave = ?wave, "Build started");

    let result = builder.build(&service).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(digest) => {
            cache.record(&service.name, &arch, &digest);
            info!(service = %service.name, attempt, duration_ms, "Build succeeded");
            BuildTask {
                service: service.name,
                attempt,
                wave,
                started_at,
                duration_ms,
                outcome: BuildOutcome::Success,
                artifact: Some(digest),
                error: None,
            }
        }
        Err(e) => {
            error!(service = %service.name, attempt, "Build failed: {}", e);
            BuildTask {
                service: service.name,
                attempt,
                wave,
                started_at,
                duration_ms,
                outcome: BuildOutcome::Failure,
                artifact: None,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn join_build(service: String, handle: JoinHandle<BuildTask>) -> BuildTask {
    match handle.await {
        Ok(task) => task,
        Err(e) => {
            error!(service = %service, "Build task aborted: {}", e);
            BuildTask {
                service,
                attempt: 0,
                wave: BuildWave::Light,
                started_at: Utc::now(),
                duration_ms: 0,
                outcome: BuildOutcome::Failure,
                artifact: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn log_wave(wave: BuildWave, tasks: &[BuildTask]) {
    let failed = tasks.iter().filter(|t| !t.succeeded()).count();
    if failed > 0 {
        warn!(wave = ?wave, total = tasks.len(), failed, "Build wave finished with failures");
    } else if !tasks.is_empty() {
        info!(wave = ?wave, total = tasks.len(), "Build wave finished");
    }
}

//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use spatial_orchestrator::audit::{AuditFinding, DependencyAuditor};
use spatial_orchestrator::build::cache::BuildCache;
use spatial_orchestrator::build::resolver::StaticResolver;
use spatial_orchestrator::build::scheduler::{self, BuildScheduler};
use spatial_orchestrator::build::ImageBuilder;
use spatial_orchestrator::errors::OrchestratorError;
use spatial_orchestrator::health::probe::{ProbeResult, ProbeTarget, Prober};
use spatial_orchestrator::health::readiness::ReadinessChecker;
use spatial_orchestrator::health::retry::RetryPolicy;
use spatial_orchestrator::registry::descriptor::ServiceDescriptor;
use spatial_orchestrator::registry::ServiceRegistry;
use spatial_orchestrator::rollback::manager::{self, RollbackManager};
use spatial_orchestrator::rollback::FixedConfirmation;
use spatial_orchestrator::runtime::{ContainerEngine, ContainerState, ExecOutput, ResourceSample};
use spatial_orchestrator::storage::layout::StorageLayout;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ================================= ENGINE ==================================== //

#[derive(Debug, Default)]
pub struct EngineState {
    pub running: BTreeSet<String>,
    pub fail_start: BTreeSet<String>,
    /// Services whose in-container commands exit non-zero
    pub exec_fails: BTreeSet<String>,
    /// Queued stats per service; `None` or an empty queue means the read fails
    pub stats: HashMap<String, VecDeque<Option<ResourceSample>>>,
    pub starts: Vec<String>,
    pub stops: Vec<String>,
    pub restarts: Vec<String>,
    pub execs: Vec<(String, Vec<String>)>,
    /// Stdout per service for in-container commands
    pub exec_stdout: HashMap<String, String>,
    /// Added to every exec, like `docker compose exec` startup
    pub exec_delay: Duration,
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    pub state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn with_running(services: &[&str]) -> Self {
        let engine = Self::default();
        engine.state().running = services.iter().map(|s| s.to_string()).collect();
        engine
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        lock(&self.state)
    }

    pub fn fail_start(&self, service: &str) {
        self.state().fail_start.insert(service.to_string());
    }

    pub fn fail_exec(&self, service: &str) {
        self.state().exec_fails.insert(service.to_string());
    }

    pub fn queue_stats(&self, service: &str, samples: &[Option<(f64, f64)>]) {
        self.state().stats.insert(
            service.to_string(),
            samples
                .iter()
                .map(|sample| {
                    sample.map(|(cpu_percent, memory_percent)| ResourceSample {
                        cpu_percent,
                        memory_percent,
                    })
                })
                .collect(),
        );
    }

    pub fn exec_replies(&self, service: &str, stdout: &str) {
        self.state()
            .exec_stdout
            .insert(service.to_string(), stdout.to_string());
    }

    pub fn with_exec_delay(self, delay: Duration) -> Self {
        self.state().exec_delay = delay;
        self
    }

    pub fn starts(&self) -> Vec<String> {
        self.state().starts.clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.state().stops.clone()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state().restarts.clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn running_services(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.state().running.iter().cloned().collect())
    }

    async fn start(&self, service: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state.starts.push(service.to_string());
        if state.fail_start.contains(service) {
            return Err(OrchestratorError::EngineError(format!(
                "{} refused to start",
                service
            )));
        }
        state.running.insert(service.to_string());
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state.stops.push(service.to_string());
        state.running.remove(service);
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state();
        state.restarts.push(service.to_string());
        state.running.insert(service.to_string());
        Ok(())
    }

    async fn exec(&self, service: &str, command: &[String]) -> Result<ExecOutput, OrchestratorError> {
        let (output, delay) = {
            let mut state = self.state();
            state.execs.push((service.to_string(), command.to_vec()));
            let exit_code = if state.exec_fails.contains(service) { 1 } else { 0 };
            let output = ExecOutput {
                exit_code,
                stdout: state.exec_stdout.get(service).cloned().unwrap_or_default(),
                stderr: String::new(),
            };
            (output, state.exec_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }

    async fn inspect(&self, service: &str) -> Result<ContainerState, OrchestratorError> {
        let state = self.state();
        if !state.running.contains(service) {
            return Ok(ContainerState::absent(service));
        }
        Ok(ContainerState {
            service: service.to_string(),
            container_id: Some(format!("{}-1", service)),
            image: Some(format!("spatial/{}:latest", service)),
            image_id: Some(format!("sha256:{}", service)),
            running: true,
            status: "running".to_string(),
            started_at: None,
        })
    }

    async fn stats(&self, service: &str) -> Result<ResourceSample, OrchestratorError> {
        self.state()
            .stats
            .get_mut(service)
            .and_then(VecDeque::pop_front)
            .flatten()
            .ok_or_else(|| OrchestratorError::EngineError(format!("no stats for {}", service)))
    }
}

// ================================= PROBER ==================================== //

/// Answers per service: success with a latency, or a connection failure
#[derive(Debug, Default)]
pub struct FakeProber {
    responses: Mutex<HashMap<String, Option<u64>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn respond(&self, service: &str, latency_ms: u64) {
        lock(&self.responses).insert(service.to_string(), Some(latency_ms));
    }

    pub fn refuse(&self, service: &str) {
        lock(&self.responses).insert(service.to_string(), None);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        lock(&self.calls).push(target.service.clone());
        match lock(&self.responses).get(&target.service).copied().flatten() {
            Some(latency_ms) => ProbeResult::ok(Duration::from_millis(latency_ms), Some(200)),
            None => ProbeResult::failed(Duration::ZERO, None, "connection refused"),
        }
    }
}

// ================================= BUILDER =================================== //

#[derive(Debug, Default)]
pub struct FakeBuilder {
    present: Mutex<BTreeSet<String>>,
    failing: Mutex<BTreeSet<String>>,
    built: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
    delay: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    /// `start <service>` / `end <service>` in the order they happened
    events: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBuilder {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Mark `image` as already in the local store
    pub fn present(&self, image: &str) {
        lock(&self.present).insert(image.to_string());
    }

    pub fn fail(&self, service: &str) {
        lock(&self.failing).insert(service.to_string());
    }

    pub fn built(&self) -> Vec<String> {
        lock(&self.built).clone()
    }

    /// Build time for one service, overriding the default delay
    pub fn delay(&self, service: &str, delay: Duration) {
        lock(&self.delays).insert(service.to_string(), delay);
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn local_digest(&self, image: &str) -> Result<Option<String>, OrchestratorError> {
        Ok(lock(&self.present)
            .contains(image)
            .then(|| format!("sha256:{}", image)))
    }

    async fn build(&self, service: &ServiceDescriptor) -> Result<String, OrchestratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        lock(&self.events).push(format!("start {}", service.name));
        let delay = lock(&self.delays)
            .get(&service.name)
            .copied()
            .unwrap_or(self.delay);
        tokio::time::sleep(delay).await;
        lock(&self.events).push(format!("end {}", service.name));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        lock(&self.built).push(service.name.clone());
        if lock(&self.failing).contains(&service.name) {
            return Err(OrchestratorError::BuildError(format!(
                "{} failed to compile",
                service.name
            )));
        }
        let image = service.image_ref();
        lock(&self.present).insert(image.clone());
        Ok(format!("sha256:{}", image))
    }

    async fn pull(&self, image: &str) -> Result<(), OrchestratorError> {
        lock(&self.pulled).push(image.to_string());
        lock(&self.present).insert(image.to_string());
        Ok(())
    }
}

// ================================= AUDITOR =================================== //

/// Fails every manifest whose path contains one of `failing`
#[derive(Debug, Default)]
pub struct FakeAuditor {
    pub failing: Vec<String>,
}

#[async_trait]
impl DependencyAuditor for FakeAuditor {
    async fn audit(&self, manifest: &Path) -> Result<AuditFinding, OrchestratorError> {
        let path = manifest.to_string_lossy();
        let passed = !self.failing.iter().any(|f| path.contains(f.as_str()));
        Ok(AuditFinding {
            passed,
            report: serde_json::json!({ "manifest": path, "vulnerabilities": [] }),
        })
    }
}

// ================================= WIRING ==================================== //

pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        interval: Duration::from_millis(1),
        max_attempts,
        attempt_timeout: Duration::from_secs(1),
    }
}

pub async fn layout(dir: &Path) -> StorageLayout {
    let layout = StorageLayout::new(dir.join("state"));
    layout.setup().await.unwrap();
    layout
}

pub fn rollback_manager(
    layout: &StorageLayout,
    project_root: &Path,
    engine: Arc<FakeEngine>,
    prober: Arc<FakeProber>,
    registry: Arc<ServiceRegistry>,
    confirm: bool,
) -> RollbackManager {
    let readiness = Arc::new(ReadinessChecker::new(engine.clone(), prober));
    RollbackManager::new(
        layout.rollback_dir(),
        engine,
        registry,
        readiness,
        Arc::new(FixedConfirmation(confirm)),
        manager::Options {
            project_root: project_root.to_path_buf(),
            snapshot_paths: vec!["docker-compose.yml".into(), ".env".into()],
            revalidation: quick_retry(2),
        },
    )
}

pub async fn build_scheduler(
    layout: &StorageLayout,
    builder: Arc<FakeBuilder>,
    options: scheduler::Options,
) -> BuildScheduler {
    let cache = Arc::new(BuildCache::load(layout.build_cache_file()).await);
    BuildScheduler::new(
        builder,
        Arc::new(StaticResolver::new(BTreeMap::new())),
        cache,
        options,
    )
    .with_memory_probe(|| 10.0)
}

//! Phase engine
//!
//! Drives the linear phase pipeline from the first phase the checkpoint store
//! does not report done. Every phase writes `started` on entry and
//! `completed`, `completed_with_warnings` or `failed` on exit. A failed phase
//! stops the run; nothing is retried automatically.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::audit::compliance::run_compliance;
use crate::audit::DependencyAuditor;
use crate::build::scheduler::BuildScheduler;
use crate::deploy::context::RunContext;
use crate::deploy::phase::{Phase, PhaseStatus};
use crate::deploy::prerequisites::{self, check_prerequisites};
use crate::deploy::summary::DeploymentSummary;
use crate::errors::OrchestratorError;
use crate::health::readiness::ReadinessChecker;
use crate::health::retry::RetryPolicy;
use crate::health::validator::{DeploymentVerdict, Validator};
use crate::registry::descriptor::DeployTier;
use crate::registry::ServiceRegistry;
use crate::rollback::manager::RollbackManager;
use crate::rollback::snapshot::RollbackTargets;
use crate::runtime::ContainerEngine;
use crate::storage::audit::AuditTrail;
use crate::storage::checkpoint::{CheckpointStore, ResumePlan};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{Credentials, EnvironmentMode};

pub const BASELINE_DESCRIPTION: &str = "pre-deployment baseline";

/// Phase engine options
#[derive(Debug, Clone)]
pub struct Options {
    pub environment: EnvironmentMode,

    /// Readiness polling for core services
    pub core_readiness: RetryPolicy,

    /// Readiness polling for application services
    pub app_readiness: RetryPolicy,

    /// Settle windows after a tier's services were started
    pub core_settle: Duration,
    pub app_settle: Duration,
    pub monitoring_settle: Duration,

    /// Execute the baseline rollback point when a service phase fails hard
    pub auto_rollback: bool,

    /// Services rebuilt even when their image is present
    pub rebuild: BTreeSet<String>,

    pub prerequisites: prerequisites::Options,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            environment: EnvironmentMode::Development,
            core_readiness: RetryPolicy {
                max_attempts: 30,
                ..RetryPolicy::default()
            },
            app_readiness: RetryPolicy::default(),
            core_settle: Duration::from_secs(10),
            app_settle: Duration::from_secs(3),
            monitoring_settle: Duration::from_secs(5),
            auto_rollback: false,
            rebuild: BTreeSet::new(),
            prerequisites: prerequisites::Options::default(),
        }
    }
}

/// Everything the phases delegate to
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ContainerEngine>,
    pub readiness: Arc<ReadinessChecker>,
    pub scheduler: Arc<BuildScheduler>,
    pub validator: Arc<Validator>,
    pub auditor: Arc<dyn DependencyAuditor>,
    pub rollback: Arc<RollbackManager>,
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub plan: ResumePlan,
    pub verdict: Option<DeploymentVerdict>,
    pub summary: DeploymentSummary,
}

impl RunOutcome {
    /// 0 for an excellent or good verdict, 2 otherwise
    pub fn exit_code(&self) -> i32 {
        self.verdict.as_ref().map(|v| v.verdict.exit_code()).unwrap_or(2)
    }
}

#[derive(Serialize)]
struct PhaseEvent<'a> {
    run_id: &'a str,
    phase: Phase,
    status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub struct PhaseEngine {
    registry: Arc<ServiceRegistry>,
    layout: StorageLayout,
    store: CheckpointStore,
    parts: Collaborators,
    credentials: Arc<Credentials>,
    audit: Option<Arc<AuditTrail>>,
    options: Options,
}

impl PhaseEngine {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        layout: StorageLayout,
        parts: Collaborators,
        credentials: Arc<Credentials>,
        options: Options,
    ) -> Self {
        Self {
            store: CheckpointStore::new(layout.checkpoint_file()),
            registry,
            layout,
            parts,
            credentials,
            audit: None,
            options,
        }
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

    /// Configuration problems that must stop a run before any side effect
    pub fn preflight(&self) -> Result<(), OrchestratorError> {
        let missing = self
            .credentials
            .missing(self.registry.credential_names().iter().map(String::as_str));
        if !missing.is_empty() {
            return Err(OrchestratorError::ConfigError(format!(
                "missing credentials: {}",
                missing.join(", ")
            )));
        }
        for service in &self.options.rebuild {
            self.registry.describe(service)?;
        }
        Ok(())
    }

    /// Run from the resume point to COMPLETE
    pub async fn run(&self) -> Result<RunOutcome, OrchestratorError> {
        self.preflight()?;

        let records = self.store.load().await;
        let plan = ResumePlan::from_records(&records);
        let phases = plan.phases();
        let mut ctx = RunContext::new(self.options.environment, phases.clone());

        match plan {
            ResumePlan::From(Phase::Cleanup) => {
                info!(run_id = %ctx.run_id, environment = %ctx.environment, "Starting deployment")
            }
            ResumePlan::From(phase) => {
                info!(run_id = %ctx.run_id, phase = %phase, "Resuming deployment")
            }
            ResumePlan::StatusOnly => {
                info!(run_id = %ctx.run_id, "All phases complete, re-running health check")
            }
        }

        for phase in phases {
            self.run_phase(phase, &mut ctx).await?;
        }

        let summary = DeploymentSummary::from_context(&ctx);
        Ok(RunOutcome {
            plan,
            verdict: ctx.verdict,
            summary,
        })
    }

    async fn run_phase(&self, phase: Phase, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        ctx.current_phase = Some(phase);
        self.store.save(phase, PhaseStatus::Started).await?;
        self.record(
            "phase",
            &PhaseEvent {
                run_id: &ctx.run_id,
                phase,
                status: PhaseStatus::Started,
                duration_ms: None,
                error: None,
            },
        );
        info!(phase = %phase, "Phase started");

        let started = Instant::now();
        let mark = ctx.mark();
        let result = self.execute(phase, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let status = if ctx.has_issues_since(mark) {
                    PhaseStatus::CompletedWithWarnings
                } else {
                    PhaseStatus::Completed
                };
                self.store.save(phase, status).await?;
                ctx.record_timing(phase, status, duration_ms);
                self.record(
                    "phase",
                    &PhaseEvent {
                        run_id: &ctx.run_id,
                        phase,
                        status,
                        duration_ms: Some(duration_ms),
                        error: None,
                    },
                );
                info!(phase = %phase, status = %status, duration_ms, "Phase finished");
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    OrchestratorError::PhaseFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.store.save(phase, PhaseStatus::Failed).await?;
                ctx.record_timing(phase, PhaseStatus::Failed, duration_ms);
                self.record(
                    "phase",
                    &PhaseEvent {
                        run_id: &ctx.run_id,
                        phase,
                        status: PhaseStatus::Failed,
                        duration_ms: Some(duration_ms),
                        error: Some(reason.clone()),
                    },
                );
                error!(phase = %phase, duration_ms, "Phase failed: {}", reason);

                if self.options.auto_rollback && phase.touches_services() {
                    self.auto_rollback(ctx).await;
                }
                Err(OrchestratorError::PhaseFailed { phase, reason })
            }
        }
    }

    async fn execute(&self, phase: Phase, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        match phase {
            Phase::Cleanup => self.cleanup(ctx).await,
            Phase::Validation => self.validation(ctx).await,
            Phase::PackageValidation => self.package_validation(ctx).await,
            Phase::ImageBuild => self.image_build(ctx).await,
            Phase::CoreServices => {
                self.ensure_baseline(ctx).await;
                self.deploy_tier(
                    DeployTier::Core,
                    self.options.core_settle,
                    Some(self.options.core_readiness),
                    ctx,
                )
                .await
            }
            Phase::AppServices => {
                self.ensure_baseline(ctx).await;
                self.deploy_tier(
                    DeployTier::App,
                    self.options.app_settle,
                    Some(self.options.app_readiness),
                    ctx,
                )
                .await
            }
            Phase::Monitoring => {
                self.ensure_baseline(ctx).await;
                self.deploy_tier(DeployTier::Monitoring, self.options.monitoring_settle, None, ctx)
                    .await
            }
            Phase::HealthCheck => self.health_check(ctx).await,
            Phase::Complete => self.complete(ctx).await,
        }
    }

    // ================================= PHASES ==================================== //

    async fn cleanup(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        let running = self.parts.engine.running_services().await?;
        if running.is_empty() {
            info!("Environment is clean");
            return Ok(());
        }

        // dependents first
        let mut ordered = self.registry.dependency_order(&running);
        ordered.reverse();
        ordered.extend(running.iter().filter(|s| !self.registry.contains(s)).cloned());

        for service in &ordered {
            match self.parts.engine.stop(service).await {
                Ok(()) => info!(service = %service, "Stopped previous instance"),
                Err(e) => ctx.warn(format!("could not stop {}: {}", service, e)),
            }
        }
        Ok(())
    }

    async fn validation(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        let report = check_prerequisites(&self.options.prerequisites, &self.credentials).await;
        for tool in &report.missing_optional_tools {
            ctx.warn(format!("optional tool not available: {}", tool));
        }
        if !report.passed() {
            return Err(OrchestratorError::DeployError(report.problems().join("; ")));
        }
        Ok(())
    }

    async fn package_validation(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        let report = run_compliance(
            &self.registry,
            self.parts.auditor.as_ref(),
            None,
            ctx.environment,
        )
        .await?;

        match report.save(&self.layout.reports_dir()).await {
            Ok(path) => {
                info!(path = %path.display(), "Compliance report saved");
                ctx.compliance_report = Some(path);
            }
            Err(e) => ctx.warn(format!("could not save compliance report: {}", e)),
        }
        self.record("compliance", &report);

        let failed = report.failed_services();
        for service in &failed {
            ctx.security_issues
                .push(format!("{}: dependency audit failed", service));
        }
        if failed.is_empty() {
            return Ok(());
        }
        if ctx.environment.compliance_is_fatal() {
            return Err(OrchestratorError::ComplianceError(format!(
                "dependency audit failed in production for {}",
                failed.join(", ")
            )));
        }
        ctx.warn(format!(
            "dependency audit failed for {} ({} mode, continuing)",
            failed.join(", "),
            ctx.environment
        ));
        Ok(())
    }

    async fn image_build(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        let report = self
            .parts
            .scheduler
            .run(&self.registry, &self.options.rebuild)
            .await;

        info!(
            coverage = %format!("{:.0}%", report.coverage * 100.0),
            built = report.built,
            expected = report.expected,
            "Image build finished"
        );
        for service in &report.failed {
            ctx.warn(format!("image build failed: {}", service));
        }
        for image in &report.pull_failures {
            ctx.warn(format!("image pull failed: {}", image));
        }

        let passed = report.passed();
        let (coverage, threshold) = (report.coverage, report.threshold);
        self.record("build_report", &report);
        ctx.build_report = Some(report);

        if !passed {
            return Err(OrchestratorError::BuildError(format!(
                "coverage {:.0}% below required {:.0}%",
                coverage * 100.0,
                threshold * 100.0
            )));
        }
        Ok(())
    }

    /// Start a tier level by level, settle, then check readiness.
    ///
    /// Readiness is attempted for every started service, including those
    /// whose dependencies failed. The tier fails hard only when none of its
    /// services could be started.
    async fn deploy_tier(
        &self,
        tier: DeployTier,
        settle: Duration,
        readiness: Option<RetryPolicy>,
        ctx: &mut RunContext,
    ) -> Result<(), OrchestratorError> {
        let levels = self.registry.deploy_levels(tier);
        let total: usize = levels.iter().map(Vec::len).sum();
        if total == 0 {
            info!(tier = ?tier, "No services in tier");
            return Ok(());
        }

        let mut started: Vec<String> = Vec::new();
        for level in &levels {
            let results = join_all(level.iter().map(|service| async move {
                (service, self.parts.engine.start(service).await)
            }))
            .await;

            for (service, result) in results {
                match result {
                    Ok(()) => {
                        info!(service = %service, "Service started");
                        started.push(service.clone());
                    }
                    Err(e) => ctx.fail_service(service, format!("start failed: {}", e)),
                }
            }
        }

        if started.is_empty() {
            return Err(OrchestratorError::DeployError(format!(
                "none of the {} {:?} services could be started",
                total, tier
            )));
        }

        info!(tier = ?tier, settle = ?settle, "Waiting for services to settle");
        tokio::time::sleep(settle).await;

        match readiness {
            Some(policy) => {
                for level in &levels {
                    let checks = level
                        .iter()
                        .filter(|s| started.contains(*s))
                        .map(|service| async move {
                            let result = match self.registry.describe(service) {
                                Ok(descriptor) => self
                                    .parts
                                    .readiness
                                    .wait_ready(descriptor, &policy)
                                    .await
                                    .map(|_| ()),
                                Err(e) => Err(e),
                            };
                            (service, result)
                        });
                    for (service, result) in join_all(checks).await {
                        if let Err(e) = result {
                            ctx.fail_service(service, format!("never became ready: {}", e));
                        }
                    }
                }
            }
            None => {
                // one best-effort probe each, no retries
                for service in &started {
                    let descriptor = self.registry.describe(service)?;
                    match self.parts.readiness.check(descriptor).await {
                        Ok(()) => info!(service = %service, "Endpoint responding"),
                        Err(e) => ctx.warn(format!("{} not responding yet: {}", service, e)),
                    }
                }
            }
        }
        Ok(())
    }

    async fn health_check(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        let verdict = self
            .parts
            .validator
            .validate(&self.registry.names(), &self.registry.thresholds())
            .await;

        ctx.performance_issues = verdict.performance_issues();
        for service in &verdict.not_running {
            ctx.failed_services.insert(service.clone());
        }
        for service in verdict.failing_endpoints() {
            if !verdict.not_running.contains(&service) {
                ctx.warn(format!("{} endpoint unreachable", service));
            }
        }

        self.layout.verdict_file().write_json(&verdict).await?;
        self.record("verdict", &verdict);
        info!(
            verdict = %verdict.verdict,
            service_ratio = verdict.service_ratio,
            endpoint_ratio = verdict.endpoint_ratio,
            "Deployment graded"
        );
        ctx.verdict = Some(verdict);
        Ok(())
    }

    async fn complete(&self, ctx: &mut RunContext) -> Result<(), OrchestratorError> {
        if ctx.verdict.is_none() {
            let file = self.layout.verdict_file();
            if file.exists().await {
                ctx.verdict = file.read_json().await.ok();
            }
        }

        let summary = DeploymentSummary::from_context(ctx);
        let path = summary.save(&self.layout.reports_dir()).await?;
        info!(
            path = %path.display(),
            duration_ms = summary.duration_ms,
            failed = summary.failed_services.len(),
            "Deployment complete"
        );
        Ok(())
    }

    // ================================= ROLLBACK ================================== //

    async fn ensure_baseline(&self, ctx: &mut RunContext) {
        if ctx.baseline_rollback.is_some() {
            return;
        }
        match self
            .parts
            .rollback
            .create_point(BASELINE_DESCRIPTION, RollbackTargets::All)
            .await
        {
            Ok(id) => ctx.baseline_rollback = Some(id),
            Err(e) => ctx.warn(format!("could not record baseline rollback point: {}", e)),
        }
    }

    async fn auto_rollback(&self, ctx: &mut RunContext) {
        let Some(id) = ctx.baseline_rollback.clone() else {
            warn!("Auto-rollback requested but no baseline point exists");
            return;
        };
        warn!(id = %id, "Executing automatic rollback to the pre-deployment baseline");
        match self.parts.rollback.execute(&id, true).await {
            Ok(outcome) => info!(
                id = %id,
                status = ?outcome.status,
                "Automatic rollback finished: {}", outcome.message
            ),
            Err(e) => error!(id = %id, "Automatic rollback failed: {}", e),
        }
    }
}

//! Shared application state: the wired collaborators every command uses

use std::sync::Arc;

use tracing::{debug, info};

use crate::app::options::AppOptions;
use crate::audit::{CommandAuditor, DependencyAuditor};
use crate::build::cache::BuildCache;
use crate::build::integrity::{IntegrityCheck, IntegrityVerifier};
use crate::build::resolver::{CachedResolver, StaticResolver};
use crate::build::scheduler::BuildScheduler;
use crate::deploy::engine::{Collaborators, PhaseEngine};
use crate::errors::OrchestratorError;
use crate::health::probe::{EndpointProber, Prober};
use crate::health::readiness::ReadinessChecker;
use crate::health::validator::Validator;
use crate::registry::ServiceRegistry;
use crate::rollback::manager::RollbackManager;
use crate::rollback::Confirmation;
use crate::runtime::docker::DockerEngine;
use crate::safeguards::monitor::SafeguardsMonitor;
use crate::storage::audit::AuditTrail;
use crate::storage::checkpoint::CheckpointStore;
use crate::storage::settings::Credentials;

pub struct AppState {
    pub options: AppOptions,
    pub registry: Arc<ServiceRegistry>,
    pub credentials: Arc<Credentials>,
    pub docker: Arc<DockerEngine>,
    pub prober: Arc<dyn Prober>,
    pub readiness: Arc<ReadinessChecker>,
    pub cache: Arc<BuildCache>,
    pub audit: Arc<AuditTrail>,
    pub rollback: Arc<RollbackManager>,
    pub checkpoints: CheckpointStore,
}

impl AppState {
    /// Create the state directory and wire every collaborator
    pub async fn init(
        mut options: AppOptions,
        confirmation: Arc<dyn Confirmation>,
    ) -> Result<Self, OrchestratorError> {
        let layout = options.layout.clone();
        layout.setup().await?;
        debug!(path = %layout.base_dir.display(), "State directory ready");

        let registry = Arc::new(ServiceRegistry::load(&layout.registry_file()).await?);
        let credential_names = registry.credential_names();
        options.engine.prerequisites.required_credentials = credential_names.clone();
        let credentials = Arc::new(Credentials::load(
            credential_names.iter().map(String::as_str),
            |name| std::env::var(name).ok(),
        ));

        let docker = Arc::new(DockerEngine::new(options.docker.clone()));
        let prober: Arc<dyn Prober> = Arc::new(EndpointProber::new(
            &options.probe_host,
            options.probe_timeout,
            docker.clone(),
        )?);
        let readiness = Arc::new(ReadinessChecker::new(docker.clone(), prober.clone()));
        let cache = Arc::new(BuildCache::load(layout.build_cache_file()).await);
        let audit = Arc::new(AuditTrail::open(layout.audit_dir().path())?);

        let rollback = Arc::new(
            RollbackManager::new(
                layout.rollback_dir(),
                docker.clone(),
                registry.clone(),
                readiness.clone(),
                confirmation,
                options.rollback.clone(),
            )
            .with_audit(audit.clone()),
        );

        info!(
            services = registry.all().len(),
            environment = %options.environment,
            "Orchestrator initialized"
        );

        Ok(Self {
            checkpoints: CheckpointStore::new(layout.checkpoint_file()),
            options,
            registry,
            credentials,
            docker,
            prober,
            readiness,
            cache,
            audit,
            rollback,
        })
    }

    pub fn auditor(&self) -> Arc<dyn DependencyAuditor> {
        Arc::new(CommandAuditor::new(self.options.auditor.clone()))
    }

    pub fn validator(&self) -> Validator {
        Validator::new(
            self.docker.clone(),
            self.prober.clone(),
            self.options.validator.clone(),
        )
    }

    pub fn phase_engine(&self) -> PhaseEngine {
        let resolver = CachedResolver::new(
            StaticResolver::new(self.options.resolver.pins.clone()),
            self.options.resolver.ttl,
        );
        let scheduler = BuildScheduler::new(
            self.docker.clone(),
            Arc::new(resolver),
            self.cache.clone(),
            self.options.scheduler.clone(),
        );

        let parts = Collaborators {
            engine: self.docker.clone(),
            readiness: self.readiness.clone(),
            scheduler: Arc::new(scheduler),
            validator: Arc::new(self.validator()),
            auditor: self.auditor(),
            rollback: self.rollback.clone(),
        };

        PhaseEngine::new(
            self.registry.clone(),
            self.options.layout.clone(),
            parts,
            self.credentials.clone(),
            self.options.engine.clone(),
        )
        .with_audit(self.audit.clone())
    }

    pub fn monitor(&self) -> SafeguardsMonitor {
        SafeguardsMonitor::new(
            self.docker.clone(),
            self.prober.clone(),
            self.registry.clone(),
            self.options.safeguards.clone(),
        )
        .with_rollback(self.rollback.clone())
        .with_audit(self.audit.clone())
    }

    pub async fn verify_integrity(
        &self,
        service: Option<&str>,
    ) -> Result<Vec<IntegrityCheck>, OrchestratorError> {
        let verifier = IntegrityVerifier {
            builder: self.docker.as_ref(),
            engine: self.docker.as_ref(),
            cache: self.cache.as_ref(),
            architecture: &self.options.scheduler.architecture,
        };
        verifier.verify(&self.registry, service).await
    }
}

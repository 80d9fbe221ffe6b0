mod common;

use std::path::Path;
use std::sync::Arc;

use spatial_orchestrator::errors::OrchestratorError;
use spatial_orchestrator::registry::descriptor::{
    BuildWeight, DeployTier, ServiceDescriptor, ServiceGroup,
};
use spatial_orchestrator::registry::ServiceRegistry;
use spatial_orchestrator::rollback::manager::{RollbackManager, RollbackStatus};
use spatial_orchestrator::rollback::snapshot::RollbackTargets;

use tokio_test::assert_ok;

use common::{layout, rollback_manager, FakeEngine, FakeProber};

fn registry() -> Arc<ServiceRegistry> {
    Arc::new(
        ServiceRegistry::new(vec![
            ServiceDescriptor::new("store", ServiceGroup::External, DeployTier::Core, BuildWeight::Minimal)
                .port(5432)
                .critical()
                .readiness_command(&["pg_isready"]),
            ServiceDescriptor::new("cache", ServiceGroup::External, DeployTier::Core, BuildWeight::Minimal)
                .port(6379),
            ServiceDescriptor::new("gateway", ServiceGroup::LightBuild, DeployTier::App, BuildWeight::Light)
                .port(8000)
                .health("/healthz", 100)
                .depends_on(&["store", "cache"]),
        ])
        .unwrap(),
    )
}

struct Fixture {
    _tmp: tempfile::TempDir,
    root: std::path::PathBuf,
    engine: Arc<FakeEngine>,
    manager: RollbackManager,
}

async fn fixture(confirm: bool) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("project");
    tokio::fs::create_dir_all(&root).await.unwrap();
    tokio::fs::write(root.join("docker-compose.yml"), "services: v1\n")
        .await
        .unwrap();
    tokio::fs::write(root.join(".env"), "MODE=one\n").await.unwrap();

    let layout = layout(tmp.path()).await;
    let engine = Arc::new(FakeEngine::with_running(&["store", "cache", "gateway"]));
    let prober = Arc::new(FakeProber::default());
    prober.respond("gateway", 15);
    let manager = rollback_manager(&layout, &root, engine.clone(), prober, registry(), confirm);

    Fixture {
        _tmp: tmp,
        root,
        engine,
        manager,
    }
}

async fn compose(root: &Path) -> String {
    tokio::fs::read_to_string(root.join("docker-compose.yml"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_execute_restores_config_and_services() {
    let f = fixture(true).await;
    let id = f
        .manager
        .create_point("before upgrade", RollbackTargets::All)
        .await
        .unwrap();
    assert_eq!(f.manager.list().await.unwrap().len(), 1);

    tokio::fs::write(f.root.join("docker-compose.yml"), "services: v2\n")
        .await
        .unwrap();

    let outcome = assert_ok!(f.manager.execute(&id, false).await);
    assert_eq!(outcome.status, RollbackStatus::Full);
    assert_eq!(outcome.restored_files, 2);
    assert_eq!(outcome.restarted, vec!["store", "cache", "gateway"]);
    assert_eq!(compose(&f.root).await, "services: v1\n");

    // dependents are stopped first
    assert_eq!(outcome.stopped, vec!["gateway", "cache", "store"]);

    let points = f.manager.list().await.unwrap();
    assert_eq!(points.len(), 2);
    assert!(points.iter().any(|p| p.id == outcome.safety_backup_id));
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let f = fixture(false).await;
    let id = f
        .manager
        .create_point("before upgrade", RollbackTargets::All)
        .await
        .unwrap();
    tokio::fs::write(f.root.join("docker-compose.yml"), "services: v2\n")
        .await
        .unwrap();

    let result = f.manager.execute(&id, false).await;
    assert!(matches!(result, Err(OrchestratorError::RollbackCancelled)));
    assert_eq!(f.manager.list().await.unwrap().len(), 1);
    assert!(f.engine.stops().is_empty());
    assert_eq!(compose(&f.root).await, "services: v2\n");
}

#[tokio::test]
async fn test_force_skips_confirmation() {
    let f = fixture(false).await;
    let id = f
        .manager
        .create_point("before upgrade", RollbackTargets::All)
        .await
        .unwrap();

    let outcome = assert_ok!(f.manager.execute(&id, true).await);
    assert_eq!(outcome.status, RollbackStatus::Full);
}

#[tokio::test]
async fn test_failed_restart_points_at_safety_backup() {
    let f = fixture(true).await;
    let id = f
        .manager
        .create_point("before upgrade", RollbackTargets::All)
        .await
        .unwrap();
    f.engine.fail_start("cache");

    let outcome = assert_ok!(f.manager.execute(&id, true).await);
    assert_eq!(outcome.status, RollbackStatus::Failed);
    assert_eq!(outcome.failed_restarts, vec!["cache"]);
    assert!(outcome.message.contains(&outcome.safety_backup_id));
    // nothing is retried
    let cache_starts = f.engine.starts().iter().filter(|s| *s == "cache").count();
    assert_eq!(cache_starts, 1);
}

#[tokio::test]
async fn test_unready_critical_service_is_partial() {
    let f = fixture(true).await;
    let id = f
        .manager
        .create_point("before upgrade", RollbackTargets::All)
        .await
        .unwrap();
    f.engine.fail_exec("store");

    let outcome = assert_ok!(f.manager.execute(&id, true).await);
    assert_eq!(outcome.status, RollbackStatus::Partial);
    assert_eq!(outcome.unhealthy_critical, vec!["store"]);
}

#[tokio::test]
async fn test_service_scoped_point_only_touches_its_services() {
    let f = fixture(true).await;
    let id = f
        .manager
        .create_point("gateway only", RollbackTargets::Services(vec!["gateway".to_string()]))
        .await
        .unwrap();

    let outcome = assert_ok!(f.manager.execute(&id, true).await);
    assert_eq!(outcome.stopped, vec!["gateway"]);
    assert_eq!(outcome.restarted, vec!["gateway"]);
}

#[tokio::test]
async fn test_unknown_points_and_services() {
    let f = fixture(true).await;
    assert!(matches!(
        f.manager.execute("rb-missing", true).await,
        Err(OrchestratorError::RollbackNotFound(_))
    ));
    assert!(matches!(
        f.manager
            .create_point("typo", RollbackTargets::Services(vec!["gatewy".to_string()]))
            .await,
        Err(OrchestratorError::UnknownService(_))
    ));
    assert!(f.manager.list().await.unwrap().is_empty());
}

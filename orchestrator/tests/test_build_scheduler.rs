mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use spatial_orchestrator::build::scheduler;
use spatial_orchestrator::build::BuildWave;
use spatial_orchestrator::registry::descriptor::{
    BuildWeight, DeployTier, ServiceDescriptor, ServiceGroup,
};
use spatial_orchestrator::registry::ServiceRegistry;

use common::{build_scheduler, layout, FakeBuilder};

fn light_services(count: usize) -> Vec<ServiceDescriptor> {
    (0..count)
        .map(|i| {
            ServiceDescriptor::new(
                &format!("svc-{:02}", i),
                ServiceGroup::LightBuild,
                DeployTier::App,
                BuildWeight::Light,
            )
        })
        .collect()
}

fn options(light_concurrency: usize) -> scheduler::Options {
    scheduler::Options {
        light_concurrency,
        architecture: "amd64".to_string(),
        ..scheduler::Options::default()
    }
}

#[tokio::test]
async fn test_seven_of_ten_meets_coverage() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(10)).unwrap();

    let builder = Arc::new(FakeBuilder::default());
    for name in ["svc-01", "svc-04", "svc-08"] {
        builder.fail(name);
    }
    let scheduler = build_scheduler(&layout, builder.clone(), options(3)).await;

    let report = scheduler.run(&registry, &BTreeSet::new()).await;
    assert_eq!(report.expected, 10);
    assert_eq!(report.built, 7);
    assert!((report.coverage - 0.7).abs() < 1e-9);
    assert!(report.passed());
    assert_eq!(report.failed, vec!["svc-01", "svc-04", "svc-08"]);
}

#[tokio::test]
async fn test_six_of_ten_fails_coverage() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(10)).unwrap();

    let builder = Arc::new(FakeBuilder::default());
    for name in ["svc-00", "svc-02", "svc-05", "svc-09"] {
        builder.fail(name);
    }
    let scheduler = build_scheduler(&layout, builder, options(3)).await;

    let report = scheduler.run(&registry, &BTreeSet::new()).await;
    assert_eq!(report.built, 6);
    assert!(!report.passed());
    assert!(report.waves.iter().any(|w| w.failed()));
}

#[tokio::test]
async fn test_light_wave_respects_window() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(10)).unwrap();

    let builder = Arc::new(FakeBuilder::with_delay(Duration::from_millis(20)));
    let scheduler = build_scheduler(&layout, builder.clone(), options(3)).await;

    let report = scheduler.run(&registry, &BTreeSet::new()).await;
    assert!(report.passed());
    assert_eq!(builder.built().len(), 10);
    assert!(builder.max_in_flight() <= 3);
    assert!(builder.max_in_flight() >= 2);
}

fn position(events: &[String], event: &str) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event {:?} in {:?}", event, events))
}

#[tokio::test]
async fn test_light_wave_waits_on_oldest_build() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(5)).unwrap();

    let builder = Arc::new(FakeBuilder::with_delay(Duration::from_millis(10)));
    builder.delay("svc-01", Duration::from_millis(300));
    let scheduler = build_scheduler(&layout, builder.clone(), options(3)).await;

    let report = scheduler.run(&registry, &BTreeSet::new()).await;
    assert!(report.passed());
    let events = builder.events();

    // svc-00 is oldest and finishes first, freeing its slot for svc-03
    // while the slow svc-01 is still building
    assert!(position(&events, "start svc-03") < position(&events, "end svc-01"));
    // svc-01 is then oldest; svc-04 waits for it even though svc-02 and
    // svc-03 have long finished
    assert!(position(&events, "end svc-02") < position(&events, "end svc-01"));
    assert!(position(&events, "start svc-04") > position(&events, "end svc-01"));
}

#[tokio::test]
async fn test_heavy_builds_run_alone_after_light_wave() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let mut services = light_services(4);
    services.push(ServiceDescriptor::new(
        "mapping-engine",
        ServiceGroup::HeavyBuild,
        DeployTier::App,
        BuildWeight::VeryHeavy,
    ));
    services.push(ServiceDescriptor::new(
        "vision-engine",
        ServiceGroup::HeavyBuild,
        DeployTier::App,
        BuildWeight::Heavy,
    ));
    let registry = ServiceRegistry::new(services).unwrap();

    let builder = Arc::new(FakeBuilder::with_delay(Duration::from_millis(10)));
    let scheduler = build_scheduler(&layout, builder.clone(), options(4)).await;

    let report = scheduler.run(&registry, &BTreeSet::new()).await;
    let light = report.waves.iter().find(|w| w.wave == BuildWave::Light).unwrap();
    let heavy = report.waves.iter().find(|w| w.wave == BuildWave::Heavy).unwrap();
    assert_eq!(light.tasks.len(), 4);
    assert_eq!(heavy.tasks.len(), 2);

    let last_light = light.tasks.iter().map(|t| t.attempt).max().unwrap();
    assert!(heavy.tasks.iter().all(|t| t.attempt > last_light));

    let built = builder.built();
    assert_eq!(&built[4..], &["mapping-engine", "vision-engine"]);
}

#[tokio::test]
async fn test_present_images_skip_unless_rebuilt() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(3)).unwrap();

    let builder = Arc::new(FakeBuilder::default());
    builder.present("spatial/svc-00:latest");
    builder.present("spatial/svc-01:latest");
    let scheduler = build_scheduler(&layout, builder.clone(), options(3)).await;

    let rebuild: BTreeSet<String> = ["svc-01".to_string()].into();
    let report = scheduler.run(&registry, &rebuild).await;

    assert_eq!(report.skipped, vec!["svc-00"]);
    let mut built = builder.built();
    built.sort();
    assert_eq!(built, vec!["svc-01", "svc-02"]);
    assert_eq!(report.built, 3);
}

#[tokio::test]
async fn test_attempt_ids_increase_across_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let layout = layout(tmp.path()).await;
    let registry = ServiceRegistry::new(light_services(2)).unwrap();

    let builder = Arc::new(FakeBuilder::default());
    let scheduler = build_scheduler(&layout, builder, options(1)).await;

    let everything: BTreeSet<String> = registry.names().into_iter().collect();
    let first = scheduler.run(&registry, &everything).await;
    let second = scheduler.run(&registry, &everything).await;

    let max_first = first.waves.iter().flat_map(|w| &w.tasks).map(|t| t.attempt).max().unwrap();
    let min_second = second.waves.iter().flat_map(|w| &w.tasks).map(|t| t.attempt).min().unwrap();
    assert!(min_second > max_first);
}

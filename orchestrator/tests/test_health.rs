mod common;

use std::sync::Arc;
use std::time::Duration;

use spatial_orchestrator::health::probe::EndpointProber;
use spatial_orchestrator::health::validator::{self, SampleVerdict, Validator};
use spatial_orchestrator::health::verdict::{grade, GradingThresholds, Verdict};
use spatial_orchestrator::registry::descriptor::PerformanceThreshold;

use common::{FakeEngine, FakeProber};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_slow_gateway_is_a_performance_issue_not_a_failure() {
    let engine = Arc::new(FakeEngine::with_running(&["gateway"]));
    let prober = Arc::new(FakeProber::default());
    prober.respond("gateway", 250);
    let validator = Validator::new(engine, prober, validator::Options::default());

    let verdict = validator
        .validate(
            &names(&["gateway"]),
            &[PerformanceThreshold::new("gateway", 8000, "/healthz", 100)],
        )
        .await;

    assert_eq!(verdict.samples.len(), 1);
    assert_eq!(verdict.samples[0].verdict, SampleVerdict::ThresholdExceeded);
    assert_eq!(verdict.samples[0].latency_ms, 250);
    assert!(verdict.not_running.is_empty());
    assert_eq!(verdict.services_running, 1);
    assert_eq!(verdict.performance_issues().len(), 1);
    assert!(verdict.performance_issues()[0].contains("gateway"));
    assert!(verdict.failing_endpoints().is_empty());
}

#[tokio::test]
async fn test_stopped_services_grade_down() {
    let engine = Arc::new(FakeEngine::with_running(&["store", "cache", "gateway", "api"]));
    let prober = Arc::new(FakeProber::default());
    prober.respond("gateway", 20);
    prober.respond("api", 30);
    let validator = Validator::new(engine, prober, validator::Options::default());

    let services = names(&["store", "cache", "gateway", "api", "tiles"]);
    let thresholds = vec![
        PerformanceThreshold::new("gateway", 8000, "/healthz", 100),
        PerformanceThreshold::new("api", 8001, "/health", 100),
        PerformanceThreshold::new("tiles", 8002, "/health", 100),
    ];
    let verdict = validator.validate(&services, &thresholds).await;

    assert_eq!(verdict.services_total, 5);
    assert_eq!(verdict.services_running, 4);
    assert_eq!(verdict.not_running, vec!["tiles"]);
    assert_eq!(verdict.endpoints_probed, 3);
    assert_eq!(verdict.endpoints_passing, 2);
    // 0.8 running, 0.67 passing
    assert_eq!(verdict.verdict, Verdict::Good);

    let tiles = verdict.samples.iter().find(|s| s.service == "tiles").unwrap();
    assert_eq!(tiles.verdict, SampleVerdict::NotRunning);
}

#[tokio::test]
async fn test_thresholds_outside_scope_are_not_probed() {
    let engine = Arc::new(FakeEngine::with_running(&["gateway"]));
    let prober = Arc::new(FakeProber::default());
    prober.respond("gateway", 10);
    let validator = Validator::new(engine, prober.clone(), validator::Options::default());

    let verdict = validator
        .validate(
            &names(&["gateway"]),
            &[
                PerformanceThreshold::new("gateway", 8000, "/healthz", 100),
                PerformanceThreshold::new("api", 8001, "/health", 100),
            ],
        )
        .await;

    assert_eq!(verdict.endpoints_probed, 1);
    assert_eq!(prober.calls(), vec!["gateway"]);
    assert_eq!(verdict.verdict, Verdict::Excellent);
}

#[tokio::test]
async fn test_check_endpoint_classifies_running_but_unreachable() {
    let engine = Arc::new(FakeEngine::with_running(&["api"]));
    let prober = Arc::new(FakeProber::default());
    prober.refuse("api");
    let validator = Validator::new(engine, prober, validator::Options::default());

    let sample = validator
        .check_endpoint(&PerformanceThreshold::new("api", 8001, "/health", 100))
        .await;
    assert_eq!(sample.verdict, SampleVerdict::Unreachable);
    assert!(!sample.passed());
    assert!(sample.error.is_some());
}

fn internal_threshold(service: &str, max_latency_ms: u64) -> PerformanceThreshold {
    PerformanceThreshold {
        internal: true,
        ..PerformanceThreshold::new(service, 8080, "/health", max_latency_ms)
    }
}

#[tokio::test]
async fn test_internal_latency_excludes_exec_overhead() {
    let engine = Arc::new(
        FakeEngine::with_running(&["multiplayer-service"]).with_exec_delay(Duration::from_millis(150)),
    );
    engine.exec_replies("multiplayer-service", "200 0.012");
    let prober = Arc::new(
        EndpointProber::new("localhost", Duration::from_secs(2), engine.clone()).unwrap(),
    );
    let validator = Validator::new(engine, prober, validator::Options::default());

    let sample = validator
        .check_endpoint(&internal_threshold("multiplayer-service", 100))
        .await;
    assert_eq!(sample.verdict, SampleVerdict::Pass);
    assert_eq!(sample.latency_ms, 12);
}

#[tokio::test]
async fn test_internal_probe_applies_threshold_to_request_time() {
    let engine = Arc::new(FakeEngine::with_running(&["localization-service"]));
    engine.exec_replies("localization-service", "200 0.340");
    let prober = Arc::new(
        EndpointProber::new("localhost", Duration::from_secs(2), engine.clone()).unwrap(),
    );
    let validator = Validator::new(engine, prober, validator::Options::default());

    let sample = validator
        .check_endpoint(&internal_threshold("localization-service", 300))
        .await;
    assert_eq!(sample.verdict, SampleVerdict::ThresholdExceeded);
    assert_eq!(sample.latency_ms, 340);
}

#[test]
fn test_grade_is_monotonic_in_both_ratios() {
    let thresholds = GradingThresholds::default();
    let steps: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();

    for &s in &steps {
        for &e in &steps {
            let base = grade(s, e, &thresholds);
            for &s2 in steps.iter().filter(|&&x| x >= s) {
                for &e2 in steps.iter().filter(|&&x| x >= e) {
                    assert!(
                        grade(s2, e2, &thresholds) >= base,
                        "grade({}, {}) < grade({}, {})",
                        s2,
                        e2,
                        s,
                        e
                    );
                }
            }
        }
    }
}

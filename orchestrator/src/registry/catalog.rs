//! Default service catalog for the Spatial Platform

use crate::registry::descriptor::{
    BuildWeight, DeployTier, Remediation, ServiceDescriptor, ServiceGroup,
};

fn exec(action: &str, command: &[&str]) -> Remediation {
    Remediation::Exec {
        action: action.to_string(),
        command: command.iter().map(|c| c.to_string()).collect(),
    }
}

/// Every service of the platform in declaration order
pub fn spatial_platform() -> Vec<ServiceDescriptor> {
    use BuildWeight::*;
    use DeployTier::*;
    use ServiceGroup::*;

    vec![
        // stateful infrastructure
        ServiceDescriptor::new("postgres", External, Core, Minimal)
            .image("postgres")
            .port(5432)
            .readiness_command(&["pg_isready", "-U", "postgres"])
            .credentials(&["POSTGRES_PASSWORD"])
            .critical(),
        ServiceDescriptor::new("redis", External, Core, Minimal)
            .image("redis")
            .port(6379)
            .readiness_command(&["redis-cli", "ping"])
            .credentials(&["REDIS_PASSWORD"])
            .remediation(exec("cache purge", &["redis-cli", "MEMORY", "PURGE"])),
        ServiceDescriptor::new("minio", External, Core, Minimal)
            .image("minio/minio")
            .port(9000)
            .health("/minio/health/live", 500)
            .credentials(&["MINIO_ROOT_PASSWORD"]),
        ServiceDescriptor::new("nakama", InfraDependent, Core, Medium)
            .image("heroiclabs/nakama")
            .port(7350)
            .health("/healthcheck", 200)
            .depends_on(&["postgres"])
            .credentials(&["NAKAMA_CONSOLE_PASSWORD"])
            .critical(),
        // application services
        ServiceDescriptor::new("api-gateway", LightBuild, App, Light)
            .port(8000)
            .health("/healthz", 100)
            .build_context("api_gateway")
            .manifest("api_gateway/requirements.txt")
            .depends_on(&["redis"])
            .credentials(&["JWT_SECRET"])
            .critical(),
        ServiceDescriptor::new("localization-service", HeavyBuild, App, VeryHeavy)
            .container_port(8080)
            .internal()
            .health("/healthz", 200)
            .build_context("localization_service")
            .manifest("localization_service/requirements.txt")
            .depends_on(&["redis", "postgres"])
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("cloud-anchor-service", LightBuild, App, Medium)
            .container_port(8080)
            .internal()
            .health("/healthz", 150)
            .build_context("cloud_anchor_service")
            .manifest("cloud_anchor_service/requirements.txt")
            .depends_on(&["postgres", "minio"])
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("vps-engine", HeavyBuild, App, Heavy)
            .container_port(8080)
            .internal()
            .health("/healthz", 300)
            .build_context("vps_engine")
            .manifest("vps_engine/requirements.txt")
            .depends_on(&["minio", "localization-service"])
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("mapping-pipeline", HeavyBuild, App, VeryHeavy)
            .container_port(8080)
            .internal()
            .health("/healthz", 300)
            .build_context("mapping_pipeline")
            .manifest("mapping_pipeline/requirements.txt")
            .depends_on(&["redis", "minio"])
            .remediation(exec(
                "worker pool shrink",
                &["celery", "-A", "spatial_mapping.celery_app", "control", "pool_shrink", "1"],
            )),
        // runs the pipeline image as a celery worker
        ServiceDescriptor::new("mapping-worker", InfraDependent, App, Light)
            .image("spatial/mapping-pipeline:latest")
            .readiness_command(&[
                "celery",
                "-A",
                "spatial_mapping.celery_app",
                "inspect",
                "ping",
            ])
            .depends_on(&["mapping-pipeline"])
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("multiplayer-service", LightBuild, App, Light)
            .container_port(8080)
            .internal()
            .health("/health", 100)
            .build_context("multiplayer_service")
            .manifest("multiplayer_service/requirements.txt")
            .depends_on(&["redis", "nakama"])
            .remediation(Remediation::Restart),
        // observability
        ServiceDescriptor::new("prometheus", External, Monitoring, Minimal)
            .image("prom/prometheus")
            .port(9090)
            .health("/-/healthy", 500)
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("grafana", External, Monitoring, Minimal)
            .image("grafana/grafana")
            .port(3000)
            .health("/api/health", 500)
            .depends_on(&["prometheus"])
            .credentials(&["GRAFANA_ADMIN_PASSWORD"])
            .remediation(Remediation::Restart),
        ServiceDescriptor::new("jaeger", External, Monitoring, Minimal)
            .image("jaegertracing/all-in-one")
            .port(16686)
            .health("/", 500)
            .remediation(Remediation::Restart),
    ]
}

//! Host metrics collection

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};
use tracing::warn;

/// Host metrics captured alongside builds, monitoring runs and reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,

    /// Memory usage in bytes
    pub memory_used: u64,

    /// Total memory in bytes
    pub memory_total: u64,

    /// Memory usage percentage
    pub memory_percent: f32,

    /// Disk usage percentage across all mounted disks
    pub disk_percent: f32,

    /// Number of CPU cores
    pub cpu_count: usize,

    /// Hostname
    pub hostname: String,
}

/// Collect host metrics
pub fn collect_host_metrics() -> HostMetrics {
    let mut sys = System::new_all();
    sys.refresh_all();

    let disks = Disks::new_with_refreshed_list();
    let (disk_used, disk_total) = disks.iter().fold((0u64, 0u64), |(used, total), disk| {
        (
            used + disk.total_space().saturating_sub(disk.available_space()),
            total + disk.total_space(),
        )
    });

    let memory_used = sys.used_memory();
    let memory_total = sys.total_memory();

    HostMetrics {
        cpu_usage: sys.global_cpu_usage(),
        memory_used,
        memory_total,
        memory_percent: percent(memory_used, memory_total),
        disk_percent: percent(disk_used, disk_total),
        cpu_count: sys.cpus().len(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Collect host metrics on the blocking pool
pub async fn sample_host_metrics() -> HostMetrics {
    match tokio::task::spawn_blocking(collect_host_metrics).await {
        Ok(metrics) => metrics,
        Err(e) => {
            warn!("host metrics collection failed: {}", e);
            HostMetrics::default()
        }
    }
}

/// Current host memory usage percentage, refreshed on demand
pub fn memory_pressure() -> f32 {
    let mut sys = System::new();
    sys.refresh_memory();
    percent(sys.used_memory(), sys.total_memory())
}

/// Whether a process with the given pid is still alive
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).is_some()
}

fn percent(used: u64, total: u64) -> f32 {
    if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

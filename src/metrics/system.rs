//! Host load sampling and health verdict

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;

/// Load fraction of CPU capacity above which the host is degraded
pub const CPU_LOAD_THRESHOLD: f64 = 0.8;
/// Free memory percentage below which the host is degraded
pub const FREE_MEMORY_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLoad {
    /// 1, 5 and 15 minute load averages
    pub load_average: [f64; 3],
    pub cpu_count: usize,
    pub total_memory: u64,
    pub free_memory: u64,
    /// One-minute load as a percentage of CPU capacity
    pub cpu_usage: f64,
    /// Used memory as a percentage of total
    pub memory_usage: f64,
    pub timestamp: DateTime<Utc>,
}

impl SystemLoad {
    pub fn from_raw(
        load_average: [f64; 3],
        cpu_count: usize,
        total_memory: u64,
        free_memory: u64,
    ) -> Self {
        let cpu_count = cpu_count.max(1);
        let cpu_usage = load_average[0] / cpu_count as f64 * 100.0;
        let memory_usage = if total_memory > 0 {
            (total_memory.saturating_sub(free_memory)) as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        Self {
            load_average,
            cpu_count,
            total_memory,
            free_memory,
            cpu_usage,
            memory_usage,
            timestamp: Utc::now(),
        }
    }

    pub fn free_memory_percent(&self) -> f64 {
        100.0 - self.memory_usage
    }
}

/// Read the current load from the host
pub fn sample(system: &mut System) -> SystemLoad {
    system.refresh_memory();
    let load = System::load_average();
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    SystemLoad::from_raw(
        [load.one, load.five, load.fifteen],
        cpu_count,
        system.total_memory(),
        system.available_memory(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub load_average: [f64; 3],
    pub timestamp: DateTime<Utc>,
}

pub fn evaluate_health(load: &SystemLoad) -> SystemHealth {
    let load_fraction = load.load_average[0] / load.cpu_count.max(1) as f64;
    let healthy =
        load_fraction < CPU_LOAD_THRESHOLD && load.free_memory_percent() > FREE_MEMORY_THRESHOLD;

    SystemHealth {
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        cpu_usage: load.cpu_usage,
        memory_usage: load.memory_usage,
        load_average: load.load_average,
        timestamp: load.timestamp,
    }
}

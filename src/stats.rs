//! Host resource statistics port

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};

/// Error type for stats sampling
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("stats unavailable: {0}")]
    Unavailable(String),
}

/// A snapshot of host CPU/memory/disk utilisation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    /// Total memory in bytes
    pub memory_total: u64,

    /// Used memory in bytes
    pub memory_used: u64,

    /// Total disk space in bytes, summed over mounted disks
    pub disk_total: u64,

    /// Used disk space in bytes
    pub disk_used: u64,

    /// CPU usage as a fraction in [0, 1] over the sampling interval
    pub cpu_usage: f64,

    /// Number of tasks currently running on this node
    pub task_count: usize,
}

/// Trait defining the host statistics source
///
/// Sampling is best-effort; callers log failures and retain the previous
/// sample. `task_count` is left at zero for the source to fill in by the
/// owning worker.
pub trait StatsSource: Send + Sync {
    fn sample(&self) -> Result<HostStats, StatsError>;
}

/// sysinfo-backed stats source
///
/// Keeps a persistent `System` so CPU usage is a delta over the interval
/// between consecutive samples.
pub struct SysinfoSource {
    system: Mutex<System>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let refresh = RefreshKind::new()
            .with_memory(MemoryRefreshKind::everything())
            .with_cpu(sysinfo::CpuRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh)),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for SysinfoSource {
    fn sample(&self) -> Result<HostStats, StatsError> {
        let (memory_total, memory_used, cpu_usage) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu_usage();

            let cpu = (system.global_cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);
            (system.total_memory(), system.used_memory(), cpu)
        };

        let disks = Disks::new_with_refreshed_list();
        let mut disk_total = 0u64;
        let mut disk_used = 0u64;
        for disk in disks.iter() {
            disk_total += disk.total_space();
            disk_used += disk.total_space().saturating_sub(disk.available_space());
        }

        Ok(HostStats {
            memory_total,
            memory_used,
            disk_total,
            disk_used,
            cpu_usage,
            task_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_sample_is_plausible() {
        let source = SysinfoSource::new();
        let stats = source.sample().unwrap();

        assert!(stats.memory_total > 0);
        assert!(stats.memory_used <= stats.memory_total);
        assert!((0.0..=1.0).contains(&stats.cpu_usage));
        assert!(stats.disk_used <= stats.disk_total);
        assert_eq!(stats.task_count, 0);
    }

    #[test]
    fn test_host_stats_wire_format() {
        let stats = HostStats {
            memory_total: 100,
            memory_used: 50,
            disk_total: 1000,
            disk_used: 250,
            cpu_usage: 0.25,
            task_count: 3,
        };

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["memoryTotal"], 100);
        assert_eq!(value["cpuUsage"], 0.25);
        assert_eq!(value["taskCount"], 3);

        let decoded: HostStats = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, stats);
    }
}

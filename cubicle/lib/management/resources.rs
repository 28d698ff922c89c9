use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::{
    runtime::{round2, SandboxInfo},
    CubicleError, CubicleResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Raw capacity and utilization of the host.
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct HostCapacity {
    /// Logical CPUs.
    cpu_count: u32,

    /// Global CPU utilization, in percent.
    cpu_used_percent: f64,

    /// Total memory, in bytes.
    total_memory_bytes: u64,
}

/// What the host offers and what tenant sandboxes have reserved of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct HostResources {
    /// Logical CPUs on the host.
    cpu_count: u32,

    /// Global CPU utilization, in percent.
    cpu_used_percent: f64,

    /// Total host memory, in GiB.
    total_memory_gb: f64,

    /// Number of tenant sandboxes, running or not.
    sandbox_count: usize,

    /// CPUs reserved by tenant sandboxes.
    allocated_cpu: u32,

    /// Memory reserved by tenant sandboxes, in GiB.
    allocated_memory_gb: f64,

    /// CPUs not reserved by any sandbox. Negative when the host is overcommitted.
    remaining_cpu: i64,

    /// Memory not reserved by any sandbox, in GiB. Negative when the host is overcommitted.
    remaining_memory_gb: f64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HostCapacity {
    /// Creates a capacity record from known values.
    pub fn new(cpu_count: u32, cpu_used_percent: f64, total_memory_bytes: u64) -> Self {
        Self {
            cpu_count,
            cpu_used_percent,
            total_memory_bytes,
        }
    }

    /// Measures the host.
    ///
    /// CPU utilization needs two samples, so this waits for the minimum sysinfo update interval
    /// on a blocking thread.
    pub async fn capture() -> CubicleResult<Self> {
        tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            system.refresh_cpu_usage();
            system.refresh_memory();

            Self {
                cpu_count: u32::try_from(system.cpus().len()).unwrap_or(u32::MAX),
                cpu_used_percent: f64::from(system.global_cpu_usage()),
                total_memory_bytes: system.total_memory(),
            }
        })
        .await
        .map_err(CubicleError::custom)
    }
}

impl HostResources {
    /// Combines host capacity with the reservations of `sandboxes`.
    ///
    /// Every sandbox counts, stopped ones included, since their limits are reserved again as soon
    /// as they start. Sandboxes without reported limits reserve nothing.
    pub fn compute(capacity: &HostCapacity, sandboxes: &[SandboxInfo]) -> Self {
        let allocated_cpu = sandboxes
            .iter()
            .filter_map(|s| s.get_cpu_count())
            .sum::<u32>();

        let allocated_memory_bytes = sandboxes
            .iter()
            .filter_map(|s| s.get_memory_bytes())
            .filter(|m| *m > 0)
            .sum::<i64>();

        let total_memory_gb = capacity.total_memory_bytes as f64 / BYTES_PER_GIB;
        let allocated_memory_gb = allocated_memory_bytes as f64 / BYTES_PER_GIB;

        Self {
            cpu_count: capacity.cpu_count,
            cpu_used_percent: round2(capacity.cpu_used_percent),
            total_memory_gb: round2(total_memory_gb),
            sandbox_count: sandboxes.len(),
            allocated_cpu,
            allocated_memory_gb: round2(allocated_memory_gb),
            remaining_cpu: i64::from(capacity.cpu_count) - i64::from(allocated_cpu),
            remaining_memory_gb: round2(total_memory_gb - allocated_memory_gb),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

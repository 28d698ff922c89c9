use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{CubicleError, CubicleResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Raw resource counters of a sandbox: the current CPU counters, the counters of the previous
/// sample, and memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct ResourceSnapshot {
    /// Cumulative CPU time used by the sandbox, in nanoseconds.
    #[builder(default)]
    cpu_total: u64,

    /// `cpu_total` at the previous sample.
    #[builder(default)]
    precpu_total: u64,

    /// Cumulative host CPU time, in nanoseconds.
    #[builder(default, setter(strip_option))]
    system_cpu: Option<u64>,

    /// `system_cpu` at the previous sample.
    #[builder(default, setter(strip_option))]
    presystem_cpu: Option<u64>,

    /// CPUs visible to the sandbox.
    #[builder(default, setter(strip_option))]
    online_cpus: Option<u64>,

    /// Memory in use, in bytes.
    #[builder(default, setter(strip_option))]
    memory_usage: Option<u64>,

    /// Memory limit, in bytes.
    #[builder(default, setter(strip_option))]
    memory_limit: Option<u64>,
}

/// Instantaneous CPU and memory utilization of a sandbox, rounded to two decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct ResourceUsage {
    /// CPU usage in percent of one CPU, so a sandbox busy on four CPUs reports 400.
    cpu_percent: f64,

    /// Memory usage in percent of the limit.
    memory_percent: f64,

    /// Memory in use, in MiB.
    memory_used_mb: f64,

    /// Memory limit, in MiB.
    memory_limit_mb: f64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ResourceUsage {
    /// Derives utilization from a snapshot.
    ///
    /// CPU usage is `cpu_delta / system_delta * 100 * online_cpus`, or zero unless both deltas are
    /// positive. A missing or zero CPU count counts as one CPU and a missing or zero memory limit
    /// as one byte.
    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> CubicleResult<Self> {
        let cpu_delta = snapshot.cpu_total as f64 - snapshot.precpu_total as f64;
        let system_delta = snapshot.system_cpu.unwrap_or(0) as f64
            - snapshot.presystem_cpu.unwrap_or(0) as f64;
        let online_cpus = match snapshot.online_cpus {
            Some(n) if n > 0 => n as f64,
            _ => 1.0,
        };

        let cpu_percent = if cpu_delta > 0.0 && system_delta > 0.0 {
            cpu_delta / system_delta * 100.0 * online_cpus
        } else {
            0.0
        };

        let memory_usage = snapshot.memory_usage.unwrap_or(0) as f64;
        let memory_limit = match snapshot.memory_limit {
            Some(n) if n > 0 => n as f64,
            _ => 1.0,
        };

        let usage = Self {
            cpu_percent: round2(cpu_percent),
            memory_percent: round2(memory_usage / memory_limit * 100.0),
            memory_used_mb: round2(memory_usage / BYTES_PER_MIB),
            memory_limit_mb: round2(memory_limit / BYTES_PER_MIB),
        };

        usage.ensure_finite()
    }

    /// Fails with [`CubicleError::StatsComputationFailed`] unless every field is a finite number.
    pub fn ensure_finite(self) -> CubicleResult<Self> {
        let fields = [
            self.cpu_percent,
            self.memory_percent,
            self.memory_used_mb,
            self.memory_limit_mb,
        ];

        if !fields.iter().all(|v| v.is_finite()) {
            return Err(CubicleError::StatsComputationFailed(format!("{self:?}")));
        }

        Ok(self)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Rounds to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

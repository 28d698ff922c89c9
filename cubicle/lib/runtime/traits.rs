use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{config::BindMount, CubicleError, CubicleResult};

use super::ResourceSnapshot;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container runtime able to run sandboxes.
///
/// Implementations address sandboxes by name and must report a missing sandbox as
/// [`CubicleError::NotFound`]. Any other runtime failure is reported as
/// [`CubicleError::RuntimeApi`], except image pulls which fail with
/// [`CubicleError::ImagePullFailed`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns true if the image is available locally.
    async fn image_exists(&self, image: &str) -> CubicleResult<bool>;

    /// Pulls the image.
    async fn pull_image(&self, image: &str) -> CubicleResult<()>;

    /// Creates the sandbox without starting it and returns its id.
    async fn create(&self, spec: &SandboxSpec) -> CubicleResult<String>;

    /// Starts the sandbox.
    async fn start(&self, name: &str) -> CubicleResult<()>;

    /// Stops the sandbox.
    async fn stop(&self, name: &str) -> CubicleResult<()>;

    /// Restarts the sandbox.
    async fn restart(&self, name: &str) -> CubicleResult<()>;

    /// Removes the sandbox. With `force`, a running sandbox is killed first.
    async fn remove(&self, name: &str, force: bool) -> CubicleResult<()>;

    /// Describes the sandbox.
    async fn inspect(&self, name: &str) -> CubicleResult<SandboxInfo>;

    /// Describes every sandbox, running or not, whose name starts with `prefix`.
    async fn list(&self, prefix: &str) -> CubicleResult<Vec<SandboxInfo>>;

    /// Takes one resource counter snapshot of a sandbox.
    async fn snapshot(&self, name: &str) -> CubicleResult<ResourceSnapshot>;
}

/// A host port forwarded to a port inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, CopyGetters)]
#[getset(get_copy = "pub with_prefix")]
pub struct PortBinding {
    /// The host port.
    host: u16,

    /// The port inside the sandbox.
    container: u16,
}

/// Everything the runtime needs to create a sandbox.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Getters, CopyGetters)]
pub struct SandboxSpec {
    /// The sandbox name.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    name: String,

    /// The full image reference, `name:tag`.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    image: String,

    /// The hostname inside the sandbox.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    hostname: String,

    /// Environment variables.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    env: BTreeMap<String, String>,

    /// Forwarded ports.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    ports: Vec<PortBinding>,

    /// Bind mounts.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    binds: Vec<BindMount>,

    /// Host devices passed through at the same path.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    devices: Vec<PathBuf>,

    /// Whether the sandbox runs privileged.
    #[builder(default = true)]
    #[getset(get_copy = "pub with_prefix")]
    privileged: bool,

    /// Number of CPUs.
    #[getset(get_copy = "pub with_prefix")]
    cpu_count: u32,

    /// Usable share of each CPU, in percent.
    #[getset(get_copy = "pub with_prefix")]
    cpu_percent: u32,

    /// Memory limit in bytes.
    #[getset(get_copy = "pub with_prefix")]
    memory_bytes: i64,

    /// Memory plus swap limit in bytes.
    #[getset(get_copy = "pub with_prefix")]
    memory_swap_bytes: i64,
}

/// The state of a sandbox as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Created but never started.
    Created,

    /// Running.
    Running,

    /// Paused.
    Paused,

    /// Restarting.
    Restarting,

    /// Being removed.
    Removing,

    /// Stopped.
    Exited,

    /// Failed and cannot be restarted.
    Dead,

    /// Anything else.
    Unknown,
}

/// A sandbox as described by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
pub struct SandboxInfo {
    /// Runtime id.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    id: String,

    /// Name.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    name: String,

    /// Current state.
    #[getset(get_copy = "pub with_prefix")]
    status: SandboxStatus,

    /// Image reference the sandbox was created from.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    image: String,

    /// Creation time as reported by the runtime.
    #[builder(default, setter(into))]
    #[getset(get = "pub with_prefix")]
    created_at: Option<String>,

    /// CPUs assigned to the sandbox.
    #[builder(default, setter(into))]
    #[getset(get_copy = "pub with_prefix")]
    cpu_count: Option<u32>,

    /// Memory limit in bytes.
    #[builder(default, setter(into))]
    #[getset(get_copy = "pub with_prefix")]
    memory_bytes: Option<i64>,

    /// Forwarded ports.
    #[builder(default)]
    #[getset(get = "pub with_prefix")]
    ports: Vec<PortBinding>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortBinding {
    /// Forwards `host` to `container`.
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }
}

impl SandboxInfo {
    /// Returns a copy with a different status.
    pub fn with_status(mut self, status: SandboxStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the host port forwarded to `container_port`, if any.
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container == container_port)
            .map(|p| p.host)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SandboxStatus {
    type Err = CubicleError;

    /// Parses a runtime state string. Unrecognised states map to [`SandboxStatus::Unknown`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" | "stopped" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_status_round_trip_names() -> CubicleResult<()> {
        assert_eq!("running".parse::<SandboxStatus>()?, SandboxStatus::Running);
        assert_eq!("EXITED".parse::<SandboxStatus>()?, SandboxStatus::Exited);
        assert_eq!("whatever".parse::<SandboxStatus>()?, SandboxStatus::Unknown);
        assert_eq!(SandboxStatus::Dead.to_string(), "dead");
        assert_eq!(
            serde_json::to_string(&SandboxStatus::Running).map_err(CubicleError::custom)?,
            "\"running\""
        );
        Ok(())
    }

    #[test]
    fn test_host_port_for() {
        let info = SandboxInfo::builder()
            .id("abc")
            .name("code-server-alice-2bd806c97f0e00af")
            .status(SandboxStatus::Running)
            .image("cxl.io/dev/code-server:latest")
            .ports(vec![PortBinding::new(9000, 8443), PortBinding::new(9001, 22)])
            .build();

        assert_eq!(info.host_port_for(8443), Some(9000));
        assert_eq!(info.host_port_for(22), Some(9001));
        assert_eq!(info.host_port_for(3000), None);
    }
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    config::ContainerPorts,
    management::PortRange,
    runtime::{SandboxInfo, SandboxStatus},
    CubicleError, CubicleResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A lifecycle action a tenant can apply to its sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxAction {
    /// Start a stopped sandbox.
    Start,

    /// Stop a running sandbox.
    Stop,

    /// Restart the sandbox.
    Restart,

    /// Remove the sandbox and release its ports.
    Remove,
}

/// What is known about a tenant's sandbox.
///
/// All fields except `exists` are absent when the tenant has no sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxReport {
    /// Whether the sandbox exists.
    pub exists: bool,

    /// Runtime id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Sandbox name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SandboxStatus>,

    /// Image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Creation time as reported by the runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// The host ports a tenant reaches its sandbox services on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap {
    /// Editor.
    pub editor_port: u16,

    /// Guest OS ssh.
    pub shell_port: u16,

    /// Guest OS remote display.
    pub display_port: u16,

    /// File manager UI.
    pub fm_ui_port: u16,

    /// File manager backend.
    pub fm_backend_port: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxReport {
    /// A report for a tenant without a sandbox.
    pub fn absent() -> Self {
        Self {
            exists: false,
            id: None,
            name: None,
            status: None,
            image: None,
            created_at: None,
        }
    }
}

impl PortMap {
    /// Maps the first five ports of `range` to the services in range order.
    pub fn from_range(range: &PortRange) -> CubicleResult<Self> {
        let port = |offset: u16| {
            range.port(offset).ok_or_else(|| {
                CubicleError::InvalidConfig(format!(
                    "port range {range} is too small for the forwarded services"
                ))
            })
        };

        Ok(Self {
            editor_port: port(0)?,
            shell_port: port(1)?,
            display_port: port(2)?,
            fm_ui_port: port(3)?,
            fm_backend_port: port(4)?,
        })
    }

    /// Pairs each host port with the container port of the same service.
    pub fn pair_with(&self, container_ports: &ContainerPorts) -> [(u16, u16); 5] {
        let [editor, shell, display, fm_ui, fm_backend] = container_ports.in_range_order();
        [
            (self.editor_port, editor),
            (self.shell_port, shell),
            (self.display_port, display),
            (self.fm_ui_port, fm_ui),
            (self.fm_backend_port, fm_backend),
        ]
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<SandboxInfo> for SandboxReport {
    fn from(info: SandboxInfo) -> Self {
        Self {
            exists: true,
            id: Some(info.get_id().clone()),
            name: Some(info.get_name().clone()),
            status: Some(info.get_status()),
            image: Some(info.get_image().clone()),
            created_at: info.get_created_at().clone(),
        }
    }
}

impl fmt::Display for SandboxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "remove",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SandboxAction {
    type Err = CubicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "remove" => Ok(Self::Remove),
            _ => Err(CubicleError::InvalidAction(s.to_string())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

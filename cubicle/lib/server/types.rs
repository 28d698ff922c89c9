//! Request and response bodies of the REST API.

use serde::{Deserialize, Serialize};

use crate::{
    management::HostResources,
    runtime::{ResourceUsage, SandboxInfo},
    service::{PortMap, SandboxReport},
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Request body of `POST /api/sandboxes`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    /// The tenant to provision a sandbox for.
    pub tenant_id: String,
}

/// Response body of `POST /api/sandboxes`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Whether the sandbox was provisioned.
    pub success: bool,

    /// The running sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxInfo>,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `GET /api/sandboxes/{tenant_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxResponse {
    /// Whether the lookup succeeded. A missing sandbox is a successful lookup.
    pub success: bool,

    /// The sandbox report, flattened into the body.
    #[serde(flatten)]
    pub report: Option<SandboxReport>,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `POST /api/sandboxes/{tenant_id}/{action}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Whether the action was applied.
    pub success: bool,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `GET /api/sandboxes/{tenant_id}/stats`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Whether the stats were read.
    pub success: bool,

    /// Current utilization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ResourceUsage>,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `GET /api/sandboxes/{tenant_id}/ports`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PortsResponse {
    /// Whether the tenant holds a port range.
    pub success: bool,

    /// Host ports of the tenant's services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortMap>,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body of `GET /api/resources`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResourcesResponse {
    /// Whether the host was measured.
    pub success: bool,

    /// Host capacity and reservations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<HostResources>,

    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//! HTTP request handlers for the REST API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{
    state::ServerState,
    types::{
        ActionResponse, CreateRequest, CreateResponse, PortsResponse, ResourcesResponse,
        SandboxResponse, StatsResponse,
    },
};
use crate::{service::SandboxAction, CubicleError};

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for `POST /api/sandboxes`.
pub async fn create_handler(
    State(state): State<ServerState>,
    Json(req): Json<CreateRequest>,
) -> Response {
    match state.service().create_sandbox(&req.tenant_id).await {
        Ok(info) => (
            StatusCode::OK,
            Json(CreateResponse {
                success: true,
                sandbox: Some(info),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(tenant = %req.tenant_id, error = %e, "sandbox provisioning failed");
            (
                status_for(&e),
                Json(CreateResponse {
                    success: false,
                    sandbox: None,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Handler for `GET /api/sandboxes/{tenant_id}`.
pub async fn sandbox_handler(
    State(state): State<ServerState>,
    Path(tenant_id): Path<String>,
) -> Response {
    match state.service().sandbox(&tenant_id).await {
        Ok(report) => (
            StatusCode::OK,
            Json(SandboxResponse {
                success: true,
                report: Some(report),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => (
            status_for(&e),
            Json(SandboxResponse {
                success: false,
                report: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/// Handler for `POST /api/sandboxes/{tenant_id}/{action}`.
pub async fn action_handler(
    State(state): State<ServerState>,
    Path((tenant_id, action)): Path<(String, String)>,
) -> Response {
    let result = match action.parse::<SandboxAction>() {
        Ok(action) => state.service().sandbox_action(&tenant_id, action).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ActionResponse {
                success: true,
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(tenant = %tenant_id, %action, error = %e, "sandbox action failed");
            (
                status_for(&e),
                Json(ActionResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Handler for `GET /api/sandboxes/{tenant_id}/stats`.
pub async fn stats_handler(
    State(state): State<ServerState>,
    Path(tenant_id): Path<String>,
) -> Response {
    match state.service().sandbox_stats(&tenant_id).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatsResponse {
                success: true,
                stats: Some(stats),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => (
            status_for(&e),
            Json(StatsResponse {
                success: false,
                stats: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/// Handler for `GET /api/sandboxes/{tenant_id}/ports`.
pub async fn ports_handler(
    State(state): State<ServerState>,
    Path(tenant_id): Path<String>,
) -> Response {
    match state.service().port_map(&tenant_id).await {
        Ok(ports) => (
            StatusCode::OK,
            Json(PortsResponse {
                success: true,
                ports: Some(ports),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => (
            status_for(&e),
            Json(PortsResponse {
                success: false,
                ports: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/// Handler for `GET /api/resources`.
pub async fn resources_handler(State(state): State<ServerState>) -> Response {
    match state.service().host_resources().await {
        Ok(resources) => (
            StatusCode::OK,
            Json(ResourcesResponse {
                success: true,
                resources: Some(resources),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed reading host resources");
            (
                status_for(&e),
                Json(ResourcesResponse {
                    success: false,
                    resources: None,
                    error: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

//-------------------------------------------------------------------------------------------------
// Functions: Helpers
//-------------------------------------------------------------------------------------------------

/// Returns the HTTP status a failed request is answered with.
pub fn status_for(error: &CubicleError) -> StatusCode {
    match error {
        CubicleError::InvalidTenantId(_)
        | CubicleError::InvalidAction(_)
        | CubicleError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        CubicleError::NotFound(_) | CubicleError::NotAllocated(_) => StatusCode::NOT_FOUND,
        CubicleError::SandboxExists(_) | CubicleError::AlreadyAllocated { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

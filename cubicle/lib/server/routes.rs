//! Route definitions for the HTTP server.

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, state::ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates the router with every API endpoint.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/api/sandboxes", post(handlers::create_handler))
        .route("/api/sandboxes/{tenant_id}", get(handlers::sandbox_handler))
        .route(
            "/api/sandboxes/{tenant_id}/stats",
            get(handlers::stats_handler),
        )
        .route(
            "/api/sandboxes/{tenant_id}/ports",
            get(handlers::ports_handler),
        )
        .route(
            "/api/sandboxes/{tenant_id}/{action}",
            post(handlers::action_handler),
        )
        .route("/api/resources", get(handlers::resources_handler))
        .with_state(state)
}

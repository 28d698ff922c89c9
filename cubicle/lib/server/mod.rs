//! REST API over the provisioning service.
//!
//! Every response body is a JSON object with a `success` flag. Failed requests also carry a
//! human readable `error` and an HTTP status derived from the error: 400 for bad input, 404 for a
//! missing sandbox or port range, 409 for conflicts and 500 for everything else.

mod handlers;
mod routes;
mod state;
mod types;

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::CubicleResult;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::status_for;
pub use routes::*;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serves the API on `addr` until ctrl-c is received.
pub async fn serve(addr: SocketAddr, state: ServerState) -> CubicleResult<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "cubicle server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("cubicle server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

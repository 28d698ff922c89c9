use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use cubicle::{
    config::CubicleConfig,
    runtime::MemoryRuntime,
    server::{create_router, ServerState},
    service::ProvisioningService,
    CubicleError, CubicleResult,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_sandbox_api_flow() -> CubicleResult<()> {
    let (_dir, router) = helper::router().await?;

    let (status, body) = helper::send(
        &router,
        Method::POST,
        "/api/sandboxes",
        Some(json!({ "tenant_id": "alice" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["sandbox"]["name"], "code-server-alice-2bd806c97f0e00af");
    assert_eq!(body["sandbox"]["status"], "running");

    let (status, body) = helper::send(&router, Method::GET, "/api/sandboxes/alice", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["exists"], true);
    assert_eq!(body["status"], "running");
    assert!(body.get("error").is_none());

    let (status, body) =
        helper::send(&router, Method::GET, "/api/sandboxes/alice/ports", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ports"]["editor_port"], 9000);
    assert_eq!(body["ports"]["fm_backend_port"], 9004);

    let (status, body) =
        helper::send(&router, Method::GET, "/api/sandboxes/alice/stats", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["memory_percent"], 25.0);

    let (status, body) =
        helper::send(&router, Method::POST, "/api/sandboxes/alice/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, _) =
        helper::send(&router, Method::POST, "/api/sandboxes/alice/remove", None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = helper::send(&router, Method::GET, "/api/sandboxes/alice", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "exists": false }));

    let (status, body) =
        helper::send(&router, Method::GET, "/api/sandboxes/alice/ports", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    Ok(())
}

#[tokio::test]
async fn test_error_statuses() -> CubicleResult<()> {
    let (_dir, router) = helper::router().await?;

    let (status, body) = helper::send(
        &router,
        Method::POST,
        "/api/sandboxes",
        Some(json!({ "tenant_id": "a b" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap_or_default().contains("invalid tenant id"));

    let (status, _) =
        helper::send(&router, Method::POST, "/api/sandboxes/alice/delete", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        helper::send(&router, Method::POST, "/api/sandboxes/nobody/stop", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        helper::send(&router, Method::GET, "/api/sandboxes/nobody/stats", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    helper::send(
        &router,
        Method::POST,
        "/api/sandboxes",
        Some(json!({ "tenant_id": "alice" })),
    )
    .await?;
    let (status, body) = helper::send(
        &router,
        Method::POST,
        "/api/sandboxes",
        Some(json!({ "tenant_id": "alice" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use super::*;

    /// A router over an in-memory runtime with an empty template and no guest images.
    pub(super) async fn router() -> CubicleResult<(TempDir, Router)> {
        let dir = TempDir::new()?;
        let template = dir.path().join("template");
        tokio::fs::create_dir_all(template.join("code/config")).await?;
        tokio::fs::write(template.join("code/config/settings.json"), "{}").await?;

        let config = CubicleConfig::builder()
            .workdir_template(template)
            .workdir_deploy(dir.path().join("deploy"))
            .home(dir.path().join("home"))
            .build();

        let service = ProvisioningService::new(config, Box::new(MemoryRuntime::new())).await?;
        Ok((dir, create_router(ServerState::new(service))))
    }

    pub(super) async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> CubicleResult<(StatusCode, Value)> {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .map_err(CubicleError::custom)?;

        let response = router
            .clone()
            .oneshot(request)
            .await
            .map_err(CubicleError::custom)?;
        let status = response.status();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(CubicleError::custom)?;
        let value = serde_json::from_slice(&bytes).map_err(CubicleError::custom)?;
        Ok((status, value))
    }
}

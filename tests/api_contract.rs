mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use common::{FAKE_IMAGE, FakeBackend, FakeLauncher, FixedRoute, WaitOutcome, test_config};
use staticmap_backend::build_router;
use staticmap_backend::features::cache::ResponseCache;
use staticmap_backend::features::render::RenderOrchestrator;
use staticmap_backend::features::session::SessionPool;
use staticmap_backend::state::AppState;

fn app_with(backend: &Arc<FakeBackend>) -> (Router, AppState) {
    let config = test_config();
    let pool = SessionPool::new(Arc::new(FakeLauncher(Arc::clone(backend))), &config.pool);
    let orchestrator = RenderOrchestrator::new(
        pool,
        Some(Arc::new(ResponseCache::new(1024))),
        Arc::new(FixedRoute(None)),
        &config,
    )
    .unwrap();
    let state = AppState::new(orchestrator);
    (build_router(state.clone(), &config.api), state)
}

fn render_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/render")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn content_type(resp: &axum::response::Response) -> &str {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn health_reports_pool_and_cache() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "staticmap-backend");
    assert_eq!(body["pool"]["maxInstances"], 2);
    assert_eq!(body["pool"]["phase"], "running");
    assert_eq!(body["pool"]["active"], 0);
    assert_eq!(body["cache"]["maxBytes"], 1024);
    assert_eq!(body["cache"]["entries"], 0);
}

#[tokio::test]
async fn health_is_unavailable_after_shutdown() {
    let backend = FakeBackend::new();
    let (app, state) = app_with(&backend);
    state.orchestrator.shutdown().await;

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "shutting_down");
    assert_eq!(body["pool"]["phase"], "closed");
}

#[tokio::test]
async fn render_returns_image_bytes() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let resp = app
        .oneshot(render_request(json!({"width": 320, "height": 200})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(content_type(&resp), "image/png");
    assert_eq!(
        resp.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    assert!(resp.headers().get("x-request-id").is_some());

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], FAKE_IMAGE);
}

#[tokio::test]
async fn render_to_html_returns_scene_markup() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let resp = app
        .oneshot(render_request(json!({"renderToHtml": true, "center": "2.35,48.85", "zoom": 13})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(content_type(&resp).starts_with("text/html"));

    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("<html"));
    assert!(html.contains("window.mapRendered"));
    assert_eq!(backend.launched(), 0);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/render")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(content_type(&resp), "application/problem+json");
    assert_eq!(json_body(resp).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn validation_problem_echoes_request_id() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let mut req = render_request(json!({"width": 0}));
    req.headers_mut()
        .insert("x-request-id", "client.req-001".parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.headers().get("x-request-id").unwrap(), "client.req-001");
    let body = json_body(resp).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["status"], 422);
    assert_eq!(body["requestId"], "client.req-001");
}

#[tokio::test]
async fn invalid_request_id_is_replaced() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let req = Request::builder()
        .uri("/health")
        .header("x-request-id", "bad id/with spaces")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(id.starts_with("render_"));
}

#[tokio::test]
async fn conflicting_sources_are_a_bad_request() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let resp = app
        .oneshot(render_request(json!({
            "geojson": {"type": "Point", "coordinates": [0.0, 0.0]},
            "geojsonfile": "https://example.invalid/a.geojson"
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["code"], "CONFLICTING_INPUT");
}

#[tokio::test]
async fn closed_pool_is_service_unavailable() {
    let backend = FakeBackend::new();
    let (app, state) = app_with(&backend);
    state.orchestrator.shutdown().await;

    let resp = app.oneshot(render_request(json!({}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(resp).await["code"], "POOL_CLOSED");
}

#[tokio::test]
async fn ready_timeout_is_a_gateway_timeout() {
    let backend = FakeBackend::new();
    backend.set_wait_outcome(WaitOutcome::Timeout);
    let (app, state) = app_with(&backend);

    let resp = app.oneshot(render_request(json!({"timeout": 10}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(resp).await["code"], "RENDER_TIMEOUT");
    assert_eq!(state.orchestrator.pool().stats().active, 0);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let backend = FakeBackend::new();
    let (app, _) = app_with(&backend);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = json_body(resp).await;
    assert!(doc["paths"]["/render"]["post"].is_object());
    assert!(doc["paths"]["/health"]["get"].is_object());
}

use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ApiConfig;
use crate::features::health::handler::health_check;
use crate::features::render::handler::create_render_router;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// 组装完整路由：`/health`、`{prefix}/render`、`/docs` 以及全局中间件。
pub fn build_router(state: AppState, api: &ApiConfig) -> Router {
    let api_router = Router::<AppState>::new().merge(create_render_router());

    Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest(&api.prefix, api_router)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(axum::middleware::from_fn(
            crate::request_id::request_id_middleware,
        ))
        // 场景 HTML 与 JSON 走 gzip/brotli，图片原样返回
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
}

pub fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 图片本身已压缩，再压缩只浪费 CPU；保留默认的最小大小阈值（32B）。
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

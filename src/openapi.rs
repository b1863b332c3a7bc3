use utoipa::openapi::server::{ServerBuilder, ServerVariableBuilder};
use utoipa::{Modify, OpenApi};

/// 为 Swagger UI 提供业务接口前缀的 Servers 配置。
///
/// - 渲染接口默认前缀为 `/api/v1`（对应 `config.api.prefix` / `APP_API__PREFIX`）。
/// - `/health` 不带前缀，因此额外提供 `/` 作为备用 server。
struct ApiServers;

impl Modify for ApiServers {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let api = ServerBuilder::new()
            .url("{api_prefix}")
            .description(Some("渲染接口（默认 /api/v1）"))
            .parameter(
                "api_prefix",
                ServerVariableBuilder::new()
                    .default_value("/api/v1")
                    .description(Some("接口前缀：对应 config.api.prefix")),
            )
            .build();

        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径（/health）"))
            .build();

        openapi.servers = Some(vec![api, root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::render::handler::render_map,
    ),
    components(
        schemas(
            crate::error::ProblemDetails,
            crate::features::render::RenderOptions,
            crate::features::route::RouteOptions,
            crate::features::route::PathOptions,
            crate::features::route::MarkerOptions,
            crate::features::route::CircleOptions,
            crate::features::session::ImageFormat,
            crate::features::session::PoolStats,
            crate::features::session::PoolPhase,
            crate::features::cache::CacheStats,
            crate::features::health::handler::HealthResponse,
        )
    ),
    modifiers(&ApiServers),
    tags(
        (
            name = "Render",
            description = "地图渲染：GeoJSON、标记与路线合成为 PNG/JPEG/WebP 图片或场景 HTML。"
        ),
        (name = "Health", description = "健康检查：服务探活与会话池状态。"),
    ),
    info(
        title = "Static Map Backend API",
        version = env!("CARGO_PKG_VERSION"),
        description = "静态地图渲染服务（Axum + utoipa）。除 /health 外，接口挂载在 `config.api.prefix`（默认 /api/v1）下，OpenAPI 的 paths 不包含该前缀。"
    )
)]
pub struct ApiDoc;

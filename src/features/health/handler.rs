use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use crate::features::cache::CacheStats;
use crate::features::session::{PoolPhase, PoolStats};
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    #[schema(example = "healthy")]
    pub status: String,
    /// 服务名称
    #[schema(example = "staticmap-backend")]
    pub service: String,
    /// 当前版本（Cargo package version）
    #[schema(example = "0.1.0")]
    pub version: String,
    /// 会话池状态
    pub pool: PoolStats,
    /// 响应缓存状态（未启用时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "健康检查",
    description = "返回服务状态、会话池与响应缓存统计。会话池关闭后返回 503。",
    responses(
        (status = 200, description = "服务健康", body = HealthResponse),
        (status = 503, description = "服务正在关闭", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool = state.orchestrator.pool().stats();
    let (code, status) = match pool.phase {
        PoolPhase::Running => (StatusCode::OK, "healthy"),
        PoolPhase::ShuttingDown | PoolPhase::Closed => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            service: "staticmap-backend".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pool,
            cache: state.orchestrator.cache().map(|c| c.stats()),
        }),
    )
}

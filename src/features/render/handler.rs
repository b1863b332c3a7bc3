use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::post,
};

use super::options::RenderOptions;
use crate::{error::AppError, state::AppState};

#[utoipa::path(
    post,
    path = "/render",
    summary = "渲染静态地图",
    description = "根据 GeoJSON、标记与可选路线渲染地图图片。`renderToHtml=true` 时仅返回场景 HTML，不占用渲染会话。",
    request_body = RenderOptions,
    responses(
        (status = 200, description = "图片字节（image/png、image/jpeg、image/webp）或场景 HTML", content_type = "image/png"),
        (status = 400, description = "参数冲突或 JSON 无效", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 422, description = "参数校验失败", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 502, description = "GeoJSON 上游拉取失败", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 503, description = "会话池已关闭", body = crate::error::ProblemDetails, content_type = "application/problem+json"),
        (status = 504, description = "等待场景就绪超时", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Render"
)]
pub async fn render_map(
    State(state): State<AppState>,
    payload: Result<Json<RenderOptions>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(options) = payload.map_err(|e| AppError::Json(e.body_text()))?;
    let output = state.orchestrator.render(&options).await?;

    let content_type = HeaderValue::from_static(output.content_type());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        output.into_bytes(),
    ))
}

pub fn create_render_router() -> Router<AppState> {
    Router::new().route("/render", post(render_map))
}

//! 渲染请求的追踪 ID。
//!
//! 一次 `/render` 可能排队等待会话、拉取 GeoJSON、重试路线服务，日志分散在多个模块；
//! 中间件把同一个 ID 挂到 span、响应头和错误响应体（`requestId`）上。

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// 服务端生成的 ID 前缀
const GENERATED_PREFIX: &str = "render_";
const MAX_LEN: usize = 128;

tokio::task_local! {
    static TASK_REQUEST_ID: String;
}

/// 当前任务所属渲染请求的 ID；在中间件之外调用时为 `None`
pub fn current_request_id() -> Option<String> {
    TASK_REQUEST_ID.try_with(|v| v.clone()).ok()
}

/// 只接受可以原样写回响应头和日志的字符
fn accept_client_id(raw: &str) -> Option<&str> {
    let id = raw.trim();
    let safe = !id.is_empty()
        && id.len() <= MAX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    safe.then_some(id)
}

fn generate_id() -> String {
    format!("{GENERATED_PREFIX}{}", Uuid::new_v4().simple())
}

fn request_id_for(req: &Request) -> String {
    req.headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(accept_client_id)
        .map_or_else(generate_id, str::to_string)
}

pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = request_id_for(&req);
    let span = tracing::info_span!("request", id = %request_id, path = %req.uri().path());

    let mut res = TASK_REQUEST_ID
        .scope(request_id.clone(), next.run(req))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    res
}

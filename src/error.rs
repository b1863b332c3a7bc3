use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Error, Debug, utoipa::ToSchema)]
pub enum AppError {
    /// 参数校验错误（不触发任何 I/O）
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 互斥参数同时出现
    #[error("参数冲突: {0}")]
    ConflictingInput(String),

    /// 网络请求错误（GeoJSON 拉取失败、上游非 2xx、超时等）
    #[error("网络错误: {0}")]
    Network(String),

    /// 等待场景就绪信号超时
    #[error("渲染超时: {0}")]
    RenderTimeout(String),

    /// 会话池已关闭或正在关闭
    #[error("会话池已关闭")]
    PoolClosed,

    /// 渲染会话错误（启动失败、崩溃、协议错误）
    #[error("渲染会话错误: {0}")]
    Session(#[from] SessionError),

    /// JSON 解析错误
    #[error("JSON 解析错误: {0}")]
    Json(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 渲染会话能力层的错误
#[derive(Error, Debug, Clone, utoipa::ToSchema)]
pub enum SessionError {
    /// 启动会话失败
    #[error("启动失败: {0}")]
    Launch(String),
    /// 会话已断开
    #[error("会话已断开: {0}")]
    Disconnected(String),
    /// 协议/驱动返回了无法处理的响应
    #[error("协议错误: {0}")]
    Protocol(String),
    /// 等待超时
    #[error("等待超时: {0}")]
    Timeout(String),
    /// 后端不支持该操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),
}

/// RFC7807 风格的错误响应（Problem Details）。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Validation Failed")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 422)]
    pub status: u16,

    /// 人类可读的详细信息。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "VALIDATION_FAILED")]
    pub code: String,

    /// 请求追踪 ID。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ConflictingInput(_) => StatusCode::BAD_REQUEST,
            AppError::Network(_) => StatusCode::BAD_GATEWAY,
            AppError::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 稳定错误码
    pub fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::ConflictingInput(_) => "CONFLICTING_INPUT",
            AppError::Network(_) => "UPSTREAM_ERROR",
            AppError::RenderTimeout(_) => "RENDER_TIMEOUT",
            AppError::PoolClosed => "POOL_CLOSED",
            AppError::Session(_) => "SESSION_FAILED",
            AppError::Json(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNPROCESSABLE_ENTITY => "Validation Failed",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.to_string()),
            code: self.stable_code().to_string(),
            request_id: crate::request_id::current_request_id(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}

// =============== Error conversions for common external errors ===============

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Network(format!("请求超时: {err}"))
        } else {
            AppError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SessionError::Timeout(err.to_string())
        } else if err.is_connect() {
            SessionError::Disconnected(err.to_string())
        } else {
            SessionError::Protocol(err.to_string())
        }
    }
}

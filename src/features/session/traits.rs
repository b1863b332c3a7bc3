use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;
use crate::features::cache::RequestInterceptor;

/// 输出图片格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// 启动渲染会话的能力（浏览器进程/远端驱动）
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn RenderSession>, SessionError>;
}

/// 一个可复用的渲染会话
#[async_trait]
pub trait RenderSession: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError>;
    async fn close(&self) -> Result<(), SessionError>;
}

/// 会话内的一个页面
#[async_trait]
pub trait RenderPage: Send {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError>;

    /// 不支持网络拦截的后端返回 [`SessionError::Unsupported`]
    async fn intercept_requests(
        &mut self,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<(), SessionError>;

    async fn load_content(&mut self, html: &str) -> Result<(), SessionError>;

    /// 轮询直到 `expression` 为真；超时返回 [`SessionError::Timeout`]
    async fn wait_for(&mut self, expression: &str, timeout: Duration) -> Result<(), SessionError>;

    /// `quality` 仅对有损格式生效
    async fn screenshot(&mut self, format: ImageFormat, quality: u8) -> Result<Vec<u8>, SessionError>;

    /// 取出自加载以来页面产生的控制台错误
    async fn take_console_errors(&mut self) -> Vec<String> {
        Vec::new()
    }

    async fn close(&mut self) -> Result<(), SessionError>;
}

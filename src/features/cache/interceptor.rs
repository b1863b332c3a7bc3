use bytes::Bytes;
use std::sync::Arc;

use super::store::{CacheEntry, ResponseCache};

/// 会话拦截到的一次上游响应
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// 请求拦截的处理结果
#[derive(Debug, Clone)]
pub enum InterceptDecision {
    /// 直接用缓存内容应答，不发出网络请求
    Respond(CacheEntry),
    /// 放行到网络
    Continue,
}

/// 渲染会话的出站请求钩子（多个会话并发调用）
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, method: &str, url: &str) -> InterceptDecision;
    fn on_response(&self, response: InterceptedResponse);
}

/// 以 [`ResponseCache`] 为后端的拦截器：命中未过期条目时直接应答，否则放行并在响应可缓存时写入。
pub struct CacheInterceptor {
    cache: Arc<ResponseCache>,
}

impl CacheInterceptor {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

impl RequestInterceptor for CacheInterceptor {
    fn on_request(&self, method: &str, url: &str) -> InterceptDecision {
        if !method.eq_ignore_ascii_case("GET") {
            return InterceptDecision::Continue;
        }
        match self.cache.get(url) {
            Some(entry) => {
                tracing::debug!(url, "缓存命中");
                InterceptDecision::Respond(entry)
            }
            None => {
                tracing::debug!(url, "缓存未命中");
                InterceptDecision::Continue
            }
        }
    }

    fn on_response(&self, response: InterceptedResponse) {
        if !response.method.eq_ignore_ascii_case("GET") || self.cache.has(&response.url) {
            return;
        }
        if let Some(entry) = CacheEntry::from_response(response.status, response.headers, response.body) {
            self.cache.set(response.url, entry);
        }
    }
}

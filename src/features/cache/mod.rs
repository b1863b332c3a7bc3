//! 渲染会话共享的 HTTP 响应缓存（字节限额 LRU）与基于它的请求拦截器。

pub mod interceptor;
pub mod store;

pub use interceptor::{CacheInterceptor, InterceptDecision, InterceptedResponse, RequestInterceptor};
pub use store::{CacheEntry, CacheStats, ResponseCache, parse_max_age};

//! 本机 Chrome 后端（DevTools 协议）。
//!
//! `headless_chrome` 的调用均为阻塞式，统一放到 `spawn_blocking` 中执行。
//! 出站请求经 Fetch 域暂停：请求阶段交给拦截器决定是否直接应答，响应阶段读取响应体后回传给拦截器。

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use bytes::Bytes;
use headless_chrome::browser::tab::{RequestInterceptor as FetchInterceptor, RequestPausedDecision};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{
    FulfillRequest, GetResponseBody, HeaderEntry, RequestPattern,
};
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::{Value, json};
use std::ffi::{OsStr, OsString};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::encode::transcode_png;
use super::traits::{ImageFormat, RenderPage, RenderSession, SessionLauncher};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::features::cache::{CacheEntry, InterceptDecision, InterceptedResponse, RequestInterceptor};

/// 单条 DevTools 命令的超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const CONSOLE_ERRORS_SCRIPT: &str =
    "JSON.stringify((window.__staticmapConsoleErrors || []).splice(0).map(String))";

async fn blocking<T, F>(f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Protocol(format!("浏览器任务失败: {e}")))?
}

/// 启动本机 Chrome 进程，每个会话对应一个浏览器进程
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    args: Vec<String>,
    idle_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            args: launch_args(config),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// headless 模式由启动选项控制，其余参数原样透传
pub fn launch_args(config: &SessionConfig) -> Vec<String> {
    config
        .effective_browser_args()
        .into_iter()
        .filter(|a| !a.starts_with("--headless"))
        .collect()
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn RenderSession>, SessionError> {
        let path = self.chrome_path.clone();
        let args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        let idle_timeout = self.idle_timeout;

        let browser = blocking(move || {
            let sandbox = !args.iter().any(|a| a == "--no-sandbox");
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(sandbox)
                .path(path)
                .idle_browser_timeout(idle_timeout)
                .args(args.iter().map(OsString::as_os_str).collect::<Vec<&OsStr>>())
                .build()
                .map_err(|e| SessionError::Launch(format!("Chrome 启动参数无效: {e}")))?;
            Browser::new(options).map_err(|e| SessionError::Launch(format!("Chrome 启动失败: {e}")))
        })
        .await?;

        tracing::debug!("Chrome 会话已启动");
        Ok(Box::new(ChromeSession {
            conn: Arc::new(ChromeConn {
                browser: Mutex::new(Some(browser)),
                connected: AtomicBool::new(true),
            }),
        }))
    }
}

struct ChromeConn {
    browser: Mutex<Option<Browser>>,
    connected: AtomicBool,
}

impl ChromeConn {
    fn with_browser<T>(&self, f: impl FnOnce(&Browser) -> T) -> Option<T> {
        let guard = self.browser.lock().ok()?;
        guard.as_ref().map(f)
    }

    /// 命令失败后探测浏览器是否还活着，决定是协议错误还是断开
    fn classify(&self, context: &str, err: impl Display) -> SessionError {
        let alive = self
            .with_browser(|b| b.get_version().is_ok())
            .unwrap_or(false);
        if alive {
            SessionError::Protocol(format!("{context}: {err}"))
        } else {
            self.connected.store(false, Ordering::SeqCst);
            SessionError::Disconnected(format!("{context}: {err}"))
        }
    }
}

pub struct ChromeSession {
    conn: Arc<ChromeConn>,
}

#[async_trait]
impl RenderSession for ChromeSession {
    fn is_connected(&self) -> bool {
        self.conn.connected.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected("Chrome 会话已断开".into()));
        }
        let conn = Arc::clone(&self.conn);
        let tab = blocking(move || {
            match conn.with_browser(|b| b.new_tab().map_err(|e| e.to_string())) {
                None => Err(SessionError::Disconnected("Chrome 会话已关闭".into())),
                Some(Err(e)) => Err(conn.classify("新建页面失败", e)),
                Some(Ok(tab)) => {
                    tab.set_default_timeout(COMMAND_TIMEOUT);
                    Ok(tab)
                }
            }
        })
        .await?;

        Ok(Box::new(ChromePage {
            conn: Arc::clone(&self.conn),
            tab,
            viewport: None,
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.conn.connected.store(false, Ordering::SeqCst);
        let browser = self.conn.browser.lock().ok().and_then(|mut g| g.take());
        if let Some(browser) = browser {
            // 释放最后一个句柄即结束浏览器进程
            blocking(move || {
                drop(browser);
                Ok(())
            })
            .await?;
        }
        Ok(())
    }
}

pub struct ChromePage {
    conn: Arc<ChromeConn>,
    tab: Arc<Tab>,
    viewport: Option<(u32, u32)>,
}

impl ChromePage {
    async fn run<T, E, F>(&self, context: &'static str, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&Tab) -> Result<T, E> + Send + 'static,
        E: Display,
        T: Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        let conn = Arc::clone(&self.conn);
        blocking(move || f(&tab).map_err(|e| conn.classify(context, e))).await
    }
}

#[async_trait]
impl RenderPage for ChromePage {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        self.run("设置视口失败", move |tab| {
            tab.set_bounds(Bounds::Normal {
                left: Some(0),
                top: Some(0),
                width: Some(f64::from(width)),
                height: Some(f64::from(height)),
            })
            .map(|_| ())
        })
        .await?;
        self.viewport = Some((width, height));
        Ok(())
    }

    async fn intercept_requests(
        &mut self,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<(), SessionError> {
        let bridge: Arc<dyn FetchInterceptor + Send + Sync> = Arc::new(FetchBridge { inner: interceptor });
        let patterns = fetch_patterns();
        self.run("启用请求拦截失败", move |tab| {
            tab.enable_request_interception(bridge)
                .and_then(|_| tab.enable_fetch(Some(&patterns), None).map(|_| ()))
        })
        .await
    }

    async fn load_content(&mut self, html: &str) -> Result<(), SessionError> {
        let literal = serde_json::to_string(html)
            .map_err(|e| SessionError::Protocol(format!("场景序列化失败: {e}")))?;
        let script = format!("document.open(); document.write({literal}); document.close();");
        self.run("加载场景失败", move |tab| tab.evaluate(&script, false).map(|_| ()))
            .await
    }

    async fn wait_for(&mut self, expression: &str, timeout: Duration) -> Result<(), SessionError> {
        let script = format!("!!({expression})");
        let poll = async {
            loop {
                let s = script.clone();
                let ready = self
                    .run("轮询就绪信号失败", move |tab| tab.evaluate(&s, false))
                    .await?;
                if ready.value == Some(Value::Bool(true)) {
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(format!(
                "{}ms 内未观察到就绪信号",
                timeout.as_millis()
            ))),
        }
    }

    async fn screenshot(&mut self, format: ImageFormat, quality: u8) -> Result<Vec<u8>, SessionError> {
        let clip = self.viewport.map(|(width, height)| Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(width),
            height: f64::from(height),
            scale: 1.0,
        });
        let png = self
            .run("截图失败", move |tab| {
                tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
            })
            .await?;

        match tokio::task::spawn_blocking(move || transcode_png(png, format, quality)).await {
            Ok(r) => r,
            Err(e) => Err(SessionError::Protocol(format!("截图转码任务失败: {e}"))),
        }
    }

    async fn take_console_errors(&mut self) -> Vec<String> {
        let result = self
            .run("读取控制台错误失败", |tab| tab.evaluate(CONSOLE_ERRORS_SCRIPT, false))
            .await;
        match result {
            Ok(obj) => match obj.value {
                Some(Value::String(json)) => serde_json::from_str(&json).unwrap_or_default(),
                _ => Vec::new(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "读取控制台错误失败");
                Vec::new()
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.run("关闭页面失败", |tab| tab.close(true).map(|_| ()))
            .await
    }
}

/// 所有请求在请求阶段和响应阶段各暂停一次（按 CDP 线上字段名构造）
pub fn fetch_patterns() -> Vec<RequestPattern> {
    ["Request", "Response"]
        .into_iter()
        .filter_map(|stage| {
            serde_json::from_value(json!({ "urlPattern": "*", "requestStage": stage })).ok()
        })
        .collect()
}

/// 用缓存条目应答一个暂停的请求
pub fn fulfill_from_cache(request_id: String, entry: &CacheEntry) -> FulfillRequest {
    FulfillRequest {
        request_id,
        response_code: u32::from(entry.status),
        response_headers: Some(
            entry
                .headers
                .iter()
                .map(|(name, value)| HeaderEntry {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        ),
        binary_response_headers: None,
        body: Some(base64_engine.encode(&entry.body)),
        response_phrase: None,
    }
}

pub fn decode_body(body: String, base64_encoded: bool) -> Option<Bytes> {
    if base64_encoded {
        base64_engine.decode(body).ok().map(Bytes::from)
    } else {
        Some(Bytes::from(body))
    }
}

/// 把 Fetch 域的暂停事件转交给 [`RequestInterceptor`]
struct FetchBridge {
    inner: Arc<dyn RequestInterceptor>,
}

impl FetchInterceptor for FetchBridge {
    fn intercept(
        &self,
        transport: Arc<Transport>,
        session_id: SessionId,
        event: RequestPausedEvent,
    ) -> RequestPausedDecision {
        let params = event.params;
        if params.response_error_reason.is_some() {
            return RequestPausedDecision::Continue(None);
        }

        let Some(status) = params.response_status_code else {
            return match self.inner.on_request(&params.request.method, &params.request.url) {
                InterceptDecision::Respond(entry) => {
                    RequestPausedDecision::Fulfill(fulfill_from_cache(params.request_id, &entry))
                }
                InterceptDecision::Continue => RequestPausedDecision::Continue(None),
            };
        };

        let body = transport.call_method_on_target(
            session_id,
            GetResponseBody {
                request_id: params.request_id.clone(),
            },
        );
        match body {
            Ok(body) => {
                if let Some(body) = decode_body(body.body, body.base_64_encoded) {
                    self.inner.on_response(InterceptedResponse {
                        url: params.request.url,
                        method: params.request.method,
                        status: u16::try_from(status).unwrap_or(0),
                        headers: params
                            .response_headers
                            .unwrap_or_default()
                            .into_iter()
                            .map(|h| (h.name, h.value))
                            .collect(),
                        body,
                    });
                }
            }
            Err(e) => tracing::debug!(url = %params.request.url, error = %e, "读取响应体失败，跳过缓存"),
        }
        RequestPausedDecision::Continue(None)
    }
}

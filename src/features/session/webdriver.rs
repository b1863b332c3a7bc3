//! W3C WebDriver 后端，用于连接远端驱动。协议不提供网络拦截，响应缓存对该后端不生效。

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as base64_engine};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::encode::transcode_png;
use super::traits::{ImageFormat, RenderPage, RenderSession, SessionLauncher};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::features::cache::RequestInterceptor;

/// 单条 WebDriver 命令的超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// 就绪信号轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const LOAD_SCRIPT: &str = "document.open(); document.write(arguments[0]); document.close();";
const CONSOLE_ERRORS_SCRIPT: &str =
    "return (window.__staticmapConsoleErrors || []).splice(0).map(String);";
const CHROME_OFFSET_SCRIPT: &str =
    "return [window.outerWidth - window.innerWidth, window.outerHeight - window.innerHeight];";

/// 通过 W3C WebDriver 协议（chromedriver 等）启动浏览器会话
pub struct WebDriverLauncher {
    client: Client,
    base_url: String,
    capabilities: Value,
}

impl WebDriverLauncher {
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let client = crate::http::client_default()
            .map_err(|e| SessionError::Launch(format!("HTTP 客户端初始化失败: {e}")))?
            .clone();
        Ok(Self {
            client,
            base_url: config.webdriver_url.trim_end_matches('/').to_string(),
            capabilities: capabilities_for(config),
        })
    }
}

/// 新建会话时提交的 capabilities
pub fn capabilities_for(config: &SessionConfig) -> Value {
    let args = config.effective_browser_args();
    let mut always_match = json!({ "browserName": config.browser_name });
    match config.browser_name.as_str() {
        "firefox" => always_match["moz:firefoxOptions"] = json!({ "args": args }),
        "MicrosoftEdge" => always_match["ms:edgeOptions"] = json!({ "args": args }),
        _ => always_match["goog:chromeOptions"] = json!({ "args": args }),
    }
    json!({ "capabilities": { "alwaysMatch": always_match } })
}

#[async_trait]
impl SessionLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn RenderSession>, SessionError> {
        let resp = self
            .client
            .post(format!("{}/session", self.base_url))
            .timeout(COMMAND_TIMEOUT)
            .json(&self.capabilities)
            .send()
            .await
            .map_err(|e| SessionError::Launch(format!("WebDriver 不可达: {e}")))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SessionError::Launch(format!("WebDriver 响应无法解析: {e}")))?;

        if let Some(err) = webdriver_error(&body) {
            return Err(SessionError::Launch(err));
        }
        let session_id = body["value"]["sessionId"]
            .as_str()
            .or_else(|| body["sessionId"].as_str())
            .ok_or_else(|| SessionError::Launch("WebDriver 未返回 sessionId".into()))?;

        tracing::debug!(session_id, "WebDriver 会话已创建");
        Ok(Box::new(WebDriverSession {
            conn: Arc::new(Connection {
                client: self.client.clone(),
                session_url: format!("{}/session/{session_id}", self.base_url),
                connected: AtomicBool::new(true),
            }),
        }))
    }
}

fn webdriver_error(body: &Value) -> Option<String> {
    let value = body.get("value")?;
    let error = value.get("error")?.as_str()?;
    let message = value.get("message").and_then(Value::as_str).unwrap_or("");
    Some(format!("{error}: {message}"))
}

struct Connection {
    client: Client,
    session_url: String,
    connected: AtomicBool,
}

impl Connection {
    /// 发送命令并返回 `value` 字段。传输失败或会话失效时标记为断开。
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, SessionError> {
        let url = format!("{}{path}", self.session_url);
        let mut req = self.client.request(method, &url).timeout(COMMAND_TIMEOUT);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(SessionError::from(e));
            }
        };
        let mut body: Value = resp.json().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            SessionError::Protocol(format!("WebDriver 响应无法解析: {e}"))
        })?;

        if let Some(err) = webdriver_error(&body) {
            if err.starts_with("invalid session id") || err.starts_with("no such window") {
                self.connected.store(false, Ordering::SeqCst);
                return Err(SessionError::Disconnected(err));
            }
            return Err(SessionError::Protocol(err));
        }
        Ok(body.get_mut("value").map(Value::take).unwrap_or(Value::Null))
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value, SessionError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }
}

/// 一个 WebDriver 会话（单窗口，同一时刻只服务一个页面）
pub struct WebDriverSession {
    conn: Arc<Connection>,
}

#[async_trait]
impl RenderSession for WebDriverSession {
    fn is_connected(&self) -> bool {
        self.conn.connected.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected("WebDriver 会话已断开".into()));
        }
        Ok(Box::new(WebDriverPage {
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let result = self.conn.command(Method::DELETE, "", None).await.map(|_| ());
        self.conn.connected.store(false, Ordering::SeqCst);
        result
    }
}

pub struct WebDriverPage {
    conn: Arc<Connection>,
}

#[async_trait]
impl RenderPage for WebDriverPage {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        let rect = |w: u32, h: u32| json!({ "width": w, "height": h });
        self.conn
            .command(Method::POST, "/window/rect", Some(rect(width, height)))
            .await?;

        // 窗口尺寸含浏览器边框，按差值补齐使可视区域等于目标尺寸
        let offset = self.conn.execute(CHROME_OFFSET_SCRIPT, json!([])).await?;
        let dx = offset[0].as_u64().unwrap_or(0) as u32;
        let dy = offset[1].as_u64().unwrap_or(0) as u32;
        if dx > 0 || dy > 0 {
            self.conn
                .command(Method::POST, "/window/rect", Some(rect(width + dx, height + dy)))
                .await?;
        }
        Ok(())
    }

    async fn intercept_requests(
        &mut self,
        _interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<(), SessionError> {
        Err(SessionError::Unsupported(
            "WebDriver 协议不支持网络请求拦截".into(),
        ))
    }

    async fn load_content(&mut self, html: &str) -> Result<(), SessionError> {
        self.conn.execute(LOAD_SCRIPT, json!([html])).await.map(|_| ())
    }

    async fn wait_for(&mut self, expression: &str, timeout: Duration) -> Result<(), SessionError> {
        let script = format!("return !!({expression});");
        // 单条命令可能阻塞到 COMMAND_TIMEOUT，整个轮询受调用方的超时约束
        let poll = async {
            loop {
                if self.conn.execute(&script, json!([])).await? == Value::Bool(true) {
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
        let value = self.conn.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| SessionError::Protocol("截图响应不是字符串".into()))?;
        let png = base64_engine
            .decode(encoded)
            .map_err(|e| SessionError::Protocol(format!("截图 base64 解码失败: {e}")))?;

        match tokio::task::spawn_blocking(move || transcode_png(png, format, quality)).await {
            Ok(r) => r,
            Err(e) => Err(SessionError::Protocol(format!("截图转码任务失败: {e}"))),
        }
    }

    async fn take_console_errors(&mut self) -> Vec<String> {
        match self.conn.execute(CONSOLE_ERRORS_SCRIPT, json!([])).await {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "读取控制台错误失败");
                Vec::new()
            }
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.conn
            .command(Method::POST, "/url", Some(json!({ "url": "about:blank" })))
            .await
            .map(|_| ())
    }
}

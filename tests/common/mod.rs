#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use staticmap_backend::config::{AppConfig, PoolConfig};
use staticmap_backend::error::SessionError;
use bytes::Bytes;
use staticmap_backend::features::cache::{
    InterceptDecision, InterceptedResponse, RequestInterceptor, ResponseCache,
};
use staticmap_backend::features::geo::Geometry;
use staticmap_backend::features::render::RenderOrchestrator;
use staticmap_backend::features::route::VehicleRouter;
use staticmap_backend::features::session::{
    ImageFormat, RenderPage, RenderSession, SessionLauncher, SessionPool,
};

pub const FAKE_IMAGE: &[u8] = b"\x89PNG-fake-screenshot";

/// 页面等待就绪时的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Timeout,
    Disconnect,
}

/// 内存中的渲染后端：记录启动/销毁/页面计数，行为可按测试调整
pub struct FakeBackend {
    pub launched: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub fail_launches: AtomicUsize,
    pub launch_delay: Mutex<Duration>,
    pub wait_outcome: Mutex<WaitOutcome>,
    pub console_errors: Mutex<Vec<String>>,
    pub loaded_html: Mutex<Option<String>>,
    pub viewport: Mutex<Option<(u32, u32)>>,
    /// 页面加载时依次发出的 GET 请求
    pub page_fetches: Mutex<Vec<String>>,
    pub cache_hits: AtomicUsize,
    pub network_fetches: AtomicUsize,
    /// 模拟不支持请求拦截的后端
    pub intercept_unsupported: AtomicBool,
}

/// 假上游对每个页面请求的应答
pub const FAKE_TILE: &[u8] = b"fake-tile";

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            launched: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            pages_opened: AtomicUsize::new(0),
            pages_closed: AtomicUsize::new(0),
            fail_launches: AtomicUsize::new(0),
            launch_delay: Mutex::new(Duration::ZERO),
            wait_outcome: Mutex::new(WaitOutcome::Ready),
            console_errors: Mutex::new(Vec::new()),
            loaded_html: Mutex::new(None),
            viewport: Mutex::new(None),
            page_fetches: Mutex::new(Vec::new()),
            cache_hits: AtomicUsize::new(0),
            network_fetches: AtomicUsize::new(0),
            intercept_unsupported: AtomicBool::new(false),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn set_wait_outcome(&self, outcome: WaitOutcome) {
        *self.wait_outcome.lock().unwrap() = outcome;
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }

    pub fn set_page_fetches(&self, urls: &[&str]) {
        *self.page_fetches.lock().unwrap() = urls.iter().map(|u| u.to_string()).collect();
    }

    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }

    pub fn network_fetches(&self) -> usize {
        self.network_fetches.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher(pub Arc<FakeBackend>);

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn RenderSession>, SessionError> {
        let delay = *self.0.launch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self
            .0
            .fail_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SessionError::Launch("fake launch failure".into()));
        }
        self.0.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            backend: Arc::clone(&self.0),
            connected: Arc::new(AtomicBool::new(true)),
        }))
    }
}

pub struct FakeSession {
    backend: Arc<FakeBackend>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl RenderSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Disconnected("fake session gone".into()));
        }
        self.backend.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            backend: Arc::clone(&self.backend),
            connected: Arc::clone(&self.connected),
            interceptor: None,
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::SeqCst);
        self.backend.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakePage {
    backend: Arc<FakeBackend>,
    connected: Arc<AtomicBool>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
}

#[async_trait]
impl RenderPage for FakePage {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        *self.backend.viewport.lock().unwrap() = Some((width, height));
        Ok(())
    }

    async fn intercept_requests(
        &mut self,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<(), SessionError> {
        if self.backend.intercept_unsupported.load(Ordering::SeqCst) {
            return Err(SessionError::Unsupported("fake backend".into()));
        }
        self.interceptor = Some(interceptor);
        Ok(())
    }

    async fn load_content(&mut self, html: &str) -> Result<(), SessionError> {
        *self.backend.loaded_html.lock().unwrap() = Some(html.to_string());

        let urls = self.backend.page_fetches.lock().unwrap().clone();
        for url in urls {
            let decision = match &self.interceptor {
                Some(i) => i.on_request("GET", &url),
                None => InterceptDecision::Continue,
            };
            match decision {
                InterceptDecision::Respond(entry) => {
                    assert_eq!(&entry.body[..], FAKE_TILE);
                    self.backend.cache_hits.fetch_add(1, Ordering::SeqCst);
                }
                InterceptDecision::Continue => {
                    self.backend.network_fetches.fetch_add(1, Ordering::SeqCst);
                    if let Some(i) = &self.interceptor {
                        i.on_response(InterceptedResponse {
                            url,
                            method: "GET".into(),
                            status: 200,
                            headers: vec![("cache-control".into(), "public, max-age=600".into())],
                            body: Bytes::from_static(FAKE_TILE),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_for(&mut self, _expression: &str, timeout: Duration) -> Result<(), SessionError> {
        let outcome = *self.backend.wait_outcome.lock().unwrap();
        match outcome {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::Timeout => Err(SessionError::Timeout(format!(
                "{}ms",
                timeout.as_millis()
            ))),
            WaitOutcome::Disconnect => {
                self.connected.store(false, Ordering::SeqCst);
                Err(SessionError::Disconnected("fake crash".into()))
            }
        }
    }

    async fn screenshot(&mut self, _format: ImageFormat, _quality: u8) -> Result<Vec<u8>, SessionError> {
        Ok(FAKE_IMAGE.to_vec())
    }

    async fn take_console_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut *self.backend.console_errors.lock().unwrap())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.backend.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 始终返回固定折线的驾车路线
pub struct FixedRoute(pub Option<Geometry>);

#[async_trait]
impl VehicleRouter for FixedRoute {
    async fn route(&self, _origin: [f64; 2], _destination: [f64; 2]) -> Option<Geometry> {
        self.0.clone()
    }
}

pub fn pool_config(max_instances: u32) -> PoolConfig {
    PoolConfig {
        max_instances,
        ..PoolConfig::default()
    }
}

pub fn fake_pool(backend: &Arc<FakeBackend>, max_instances: u32) -> SessionPool {
    SessionPool::new(
        Arc::new(FakeLauncher(Arc::clone(backend))),
        &pool_config(max_instances),
    )
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pool = pool_config(2);
    config.geojson.fetch_timeout_secs = 1;
    config
}

pub fn fake_orchestrator(backend: &Arc<FakeBackend>, config: &AppConfig) -> RenderOrchestrator {
    let pool = SessionPool::new(Arc::new(FakeLauncher(Arc::clone(backend))), &config.pool);
    RenderOrchestrator::new(pool, None, Arc::new(FixedRoute(None)), config)
        .expect("orchestrator")
}

pub fn cached_orchestrator(
    backend: &Arc<FakeBackend>,
    config: &AppConfig,
    cache: Arc<ResponseCache>,
) -> RenderOrchestrator {
    let pool = SessionPool::new(Arc::new(FakeLauncher(Arc::clone(backend))), &config.pool);
    RenderOrchestrator::new(pool, Some(cache), Arc::new(FixedRoute(None)), config)
        .expect("orchestrator")
}

/// 在 127.0.0.1:0 上启动一个上游桩服务，返回其基础 URL
pub async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

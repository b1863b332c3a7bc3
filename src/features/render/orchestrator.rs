use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::io::AsyncReadExt;

use super::options::{GeoJsonSource, NormalizedOptions, RenderOptions};
use super::postprocess::PostProcessor;
use super::scene::SceneBuilder;
use crate::config::{AppConfig, GeoJsonConfig, RenderConfig, SessionBackend};
use crate::error::{AppError, SessionError};
use crate::features::cache::{CacheInterceptor, ResponseCache};
use crate::features::route::{OsrmClient, RouteBuilder, VehicleRouter, merge_features};
use crate::features::session::{
    ChromeLauncher, ImageFormat, PooledSession, RenderPage, SessionLauncher, SessionPool,
    WebDriverLauncher,
};

/// 渲染结果
#[derive(Debug, Clone)]
pub enum RenderOutput {
    Html(String),
    Image { bytes: Vec<u8>, format: ImageFormat },
}

impl RenderOutput {
    pub fn content_type(&self) -> &'static str {
        match self {
            RenderOutput::Html(_) => "text/html; charset=utf-8",
            RenderOutput::Image { format, .. } => format.mime(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RenderOutput::Html(html) => html.into_bytes(),
            RenderOutput::Image { bytes, .. } => bytes,
        }
    }
}

/// 组合路线构建、场景生成、会话池与响应缓存，完成一次渲染。
///
/// 借出的会话在所有退出路径上恰好归还一次。
pub struct RenderOrchestrator {
    pool: SessionPool,
    cache: Option<Arc<ResponseCache>>,
    routes: RouteBuilder,
    scene: SceneBuilder,
    post: PostProcessor,
    http: Client,
    render_config: RenderConfig,
    geojson_config: GeoJsonConfig,
    interception_warned: AtomicBool,
}

impl RenderOrchestrator {
    pub fn new(
        pool: SessionPool,
        cache: Option<Arc<ResponseCache>>,
        router: Arc<dyn VehicleRouter>,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        Ok(Self {
            pool,
            cache,
            routes: RouteBuilder::new(router),
            scene: SceneBuilder::new(&config.render)?,
            post: PostProcessor::new(&config.postprocess),
            http: crate::http::client_default()?.clone(),
            render_config: config.render.clone(),
            geojson_config: config.geojson.clone(),
            interception_warned: AtomicBool::new(false),
        })
    }

    /// 按配置装配会话池、OSRM 客户端与响应缓存
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let launcher: Arc<dyn SessionLauncher> = match config.session.backend {
            SessionBackend::Chrome => Arc::new(ChromeLauncher::new(&config.session)),
            SessionBackend::WebDriver => Arc::new(WebDriverLauncher::new(&config.session)?),
        };
        let pool = SessionPool::new(launcher, &config.pool);
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::from_config(&config.cache)));
        let router: Arc<dyn VehicleRouter> = Arc::new(OsrmClient::new(&config.route)?);
        Self::new(pool, cache, router, config)
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// 关闭会话池（进程退出前调用）
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    pub async fn render(&self, options: &RenderOptions) -> Result<RenderOutput, AppError> {
        let started = Instant::now();
        let opts = options.normalize(&self.render_config, &self.geojson_config)?;

        let mut geojson = self.resolve_source(&opts.source).await?;
        if let Some(plan) = &opts.route {
            let features = self.routes.build(plan).await;
            geojson = merge_features(features, geojson)?;
        }

        let html = self.scene.render(&opts, geojson.as_ref())?;
        if opts.render_to_html {
            return Ok(RenderOutput::Html(html));
        }

        let session = self.pool.acquire().await?;
        let result = self.capture(&session, &html, &opts).await;
        self.pool.release(session).await;
        let mut bytes = result?;

        if opts.optimize {
            bytes = self.post.optimize(bytes, opts.format).await;
        }

        tracing::info!(
            width = opts.width,
            height = opts.height,
            format = opts.format.extension(),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "渲染完成"
        );
        Ok(RenderOutput::Image {
            bytes,
            format: opts.format,
        })
    }

    async fn resolve_source(&self, source: &GeoJsonSource) -> Result<Option<Value>, AppError> {
        let text = match source {
            GeoJsonSource::None => return Ok(None),
            GeoJsonSource::Inline(value) => return Ok(Some(value.clone())),
            GeoJsonSource::Remote(url) => {
                let resp = self
                    .http
                    .get(url)
                    .timeout(self.geojson_config.fetch_timeout())
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(AppError::Network(format!("GeoJSON 拉取失败: HTTP {status}")));
                }
                resp.text().await?
            }
            GeoJsonSource::Local(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                AppError::Validation(format!("无法读取 GeoJSON 文件 {}: {e}", path.display()))
            })?,
            GeoJsonSource::Stdin => {
                let mut buf = String::new();
                tokio::io::stdin()
                    .read_to_string(&mut buf)
                    .await
                    .map_err(|e| AppError::Validation(format!("无法从标准输入读取 GeoJSON: {e}")))?;
                buf
            }
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| AppError::Json(format!("GeoJSON 不是合法 JSON: {e}")))
    }

    /// 页面关闭失败只记录告警
    async fn capture(
        &self,
        session: &PooledSession,
        html: &str,
        opts: &NormalizedOptions,
    ) -> Result<Vec<u8>, AppError> {
        let mut page = session.new_page().await?;
        let result = self.drive_page(page.as_mut(), html, opts).await;
        if let Err(e) = page.close().await {
            tracing::warn!(error = %e, "页面关闭失败");
        }
        result
    }

    async fn drive_page(
        &self,
        page: &mut dyn RenderPage,
        html: &str,
        opts: &NormalizedOptions,
    ) -> Result<Vec<u8>, AppError> {
        if let Some(cache) = &self.cache {
            let interceptor = Arc::new(CacheInterceptor::new(Arc::clone(cache)));
            match page.intercept_requests(interceptor).await {
                Ok(()) => {}
                Err(SessionError::Unsupported(msg)) => {
                    if !self.interception_warned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(reason = %msg, "会话不支持请求拦截，响应缓存不生效");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        page.set_viewport(opts.width, opts.height).await?;
        page.load_content(html).await?;
        page.wait_for(&self.render_config.ready_signal, opts.timeout)
            .await
            .map_err(|e| match e {
                SessionError::Timeout(msg) => AppError::RenderTimeout(msg),
                other => AppError::Session(other),
            })?;

        if opts.halt_on_console_error {
            let errors = page.take_console_errors().await;
            if !errors.is_empty() {
                return Err(AppError::Session(SessionError::Protocol(format!(
                    "页面控制台报错: {}",
                    errors.join("; ")
                ))));
            }
        }

        Ok(page.screenshot(opts.format, opts.quality).await?)
    }
}

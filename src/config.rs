use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例（仅供二进制入口使用，核心组件通过构造参数接收各自的配置段）
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        3000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 路由前缀
    #[serde(default = "ApiConfig::default_prefix")]
    pub prefix: String,
}

impl ApiConfig {
    fn default_prefix() -> String {
        "/api/v1".to_string()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: Self::default_prefix(),
        }
    }
}

/// 渲染会话池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 同时借出的会话上限（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_instances: u32,
    /// 启动单个会话的超时（秒）
    #[serde(default = "PoolConfig::default_launch_timeout")]
    pub launch_timeout_secs: u64,
    /// 为排队请求启动会话时的最大尝试次数
    #[serde(default = "PoolConfig::default_waiter_attempts")]
    pub waiter_launch_attempts: u32,
    /// 单个会话最多被借出的次数，达到后在归还时销毁（0=不限制）
    #[serde(default)]
    pub max_session_uses: u32,
}

impl PoolConfig {
    fn default_launch_timeout() -> u64 {
        30
    }
    fn default_waiter_attempts() -> u32 {
        3
    }

    /// 实际生效的容量上限
    pub fn effective_max_instances(&self) -> usize {
        match self.max_instances {
            0 => num_cpus::get().max(1),
            m => m as usize,
        }
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs.max(1))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 0,
            launch_timeout_secs: Self::default_launch_timeout(),
            waiter_launch_attempts: Self::default_waiter_attempts(),
            max_session_uses: 0,
        }
    }
}

/// 网络响应缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否把会话的网络请求接入缓存
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,
    /// 缓存最大容量（字节），按响应体大小累计
    #[serde(default = "CacheConfig::default_max_bytes")]
    pub max_bytes: u64,
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_max_bytes() -> u64 {
        64 * 1024 * 1024
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_bytes: Self::default_max_bytes(),
        }
    }
}

/// 路线服务（OSRM）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// OSRM 服务基地址
    #[serde(default = "RouteConfig::default_base_url")]
    pub osrm_base_url: String,
    /// 单次请求超时（毫秒）
    #[serde(default = "RouteConfig::default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
    /// 失败后的额外重试次数
    #[serde(default = "RouteConfig::default_retries")]
    pub retries: u32,
    /// 线性退避基数（毫秒），第 n 次失败后等待 n × backoff_ms
    #[serde(default = "RouteConfig::default_backoff")]
    pub backoff_ms: u64,
}

impl RouteConfig {
    fn default_base_url() -> String {
        "https://router.project-osrm.org".to_string()
    }
    fn default_attempt_timeout() -> u64 {
        8000
    }
    fn default_retries() -> u32 {
        2
    }
    fn default_backoff() -> u64 {
        1000
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            osrm_base_url: Self::default_base_url(),
            attempt_timeout_ms: Self::default_attempt_timeout(),
            retries: Self::default_retries(),
            backoff_ms: Self::default_backoff(),
        }
    }
}

/// GeoJSON 数据源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoJsonConfig {
    /// 远程 GeoJSON 拉取超时（秒）
    #[serde(default = "GeoJsonConfig::default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// 是否允许读取本地文件（服务模式下默认关闭）
    #[serde(default)]
    pub allow_local_files: bool,
}

impl GeoJsonConfig {
    fn default_fetch_timeout() -> u64 {
        15
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for GeoJsonConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: Self::default_fetch_timeout(),
            allow_local_files: false,
        }
    }
}

/// 场景渲染配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// 等待就绪信号的默认超时（毫秒）
    #[serde(default = "RenderConfig::default_ready_timeout")]
    pub ready_timeout_ms: u64,
    /// 就绪判定表达式（在页面中求值，为 true 即就绪）
    #[serde(default = "RenderConfig::default_ready_signal")]
    pub ready_signal: String,
    /// 外部模板目录（包含 `scene.html.jinja`，缺省使用内置模板）
    #[serde(default)]
    pub template_dir: Option<String>,
    #[serde(default = "RenderConfig::default_leaflet_js")]
    pub leaflet_js_url: String,
    #[serde(default = "RenderConfig::default_leaflet_css")]
    pub leaflet_css_url: String,
    /// 折线箭头插件（arrows=true 时加载）
    #[serde(default = "RenderConfig::default_decorator_js")]
    pub decorator_js_url: String,
    /// 默认瓦片地址
    #[serde(default = "RenderConfig::default_tileserver")]
    pub tileserver_url: String,
    /// 默认版权说明
    #[serde(default = "RenderConfig::default_attribution")]
    pub attribution: String,
    /// 默认最大缩放级别
    #[serde(default = "RenderConfig::default_max_zoom")]
    pub max_zoom: u32,
}

impl RenderConfig {
    fn default_ready_timeout() -> u64 {
        30_000
    }
    fn default_ready_signal() -> String {
        "window.mapRendered === true".to_string()
    }
    fn default_leaflet_js() -> String {
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string()
    }
    fn default_leaflet_css() -> String {
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css".to_string()
    }
    fn default_decorator_js() -> String {
        "https://unpkg.com/leaflet-polylinedecorator@1.6.0/dist/leaflet.polylineDecorator.js"
            .to_string()
    }
    fn default_tileserver() -> String {
        "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string()
    }
    fn default_attribution() -> String {
        "staticmap | © OpenStreetMap contributors".to_string()
    }
    fn default_max_zoom() -> u32 {
        15
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: Self::default_ready_timeout(),
            ready_signal: Self::default_ready_signal(),
            template_dir: None,
            leaflet_js_url: Self::default_leaflet_js(),
            leaflet_css_url: Self::default_leaflet_css(),
            decorator_js_url: Self::default_decorator_js(),
            tileserver_url: Self::default_tileserver(),
            attribution: Self::default_attribution(),
            max_zoom: Self::default_max_zoom(),
        }
    }
}

/// 渲染会话后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// 本机 Chrome（DevTools 协议，支持请求拦截）
    #[default]
    Chrome,
    /// 远端 W3C WebDriver（不支持请求拦截，响应缓存不生效）
    WebDriver,
}

/// 浏览器会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: SessionBackend,
    /// Chrome 可执行文件路径，未设置时自动探测
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    /// 浏览器无任何 DevTools 事件超过该时长即视为失联
    #[serde(default = "SessionConfig::default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// WebDriver 服务地址（chromedriver 默认端口 9515）
    #[serde(default = "SessionConfig::default_webdriver_url")]
    pub webdriver_url: String,
    /// 浏览器名称（仅 WebDriver 后端）
    #[serde(default = "SessionConfig::default_browser_name")]
    pub browser_name: String,
    /// 浏览器启动参数
    #[serde(default = "SessionConfig::default_browser_args")]
    pub browser_args: Vec<String>,
    /// 是否运行在托管运行时（如 Lambda），会追加单进程参数
    #[serde(default = "SessionConfig::default_managed_runtime")]
    pub managed_runtime: bool,
}

impl SessionConfig {
    fn default_idle_timeout() -> u64 {
        3600
    }
    fn default_webdriver_url() -> String {
        "http://127.0.0.1:9515".to_string()
    }
    fn default_browser_name() -> String {
        "chrome".to_string()
    }
    fn default_browser_args() -> Vec<String> {
        vec![
            "--headless=new".to_string(),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--ignore-certificate-errors".to_string(),
        ]
    }
    fn default_managed_runtime() -> bool {
        std::env::var_os("AWS_LAMBDA_FUNCTION_VERSION").is_some()
    }

    /// 合并托管运行时所需的参数
    pub fn effective_browser_args(&self) -> Vec<String> {
        let mut args = self.browser_args.clone();
        if self.managed_runtime {
            for extra in ["--single-process", "--no-zygote"] {
                if !args.iter().any(|a| a == extra) {
                    args.push(extra.to_string());
                }
            }
        }
        args
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            chrome_path: None,
            idle_timeout_secs: Self::default_idle_timeout(),
            webdriver_url: Self::default_webdriver_url(),
            browser_name: Self::default_browser_name(),
            browser_args: Self::default_browser_args(),
            managed_runtime: Self::default_managed_runtime(),
        }
    }
}

/// 外部图片压缩器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessConfig {
    #[serde(default = "PostprocessConfig::default_oxipng")]
    pub oxipng_path: String,
    #[serde(default = "PostprocessConfig::default_jpegtran")]
    pub jpegtran_path: String,
}

impl PostprocessConfig {
    fn default_oxipng() -> String {
        "oxipng".to_string()
    }
    fn default_jpegtran() -> String {
        "jpegtran".to_string()
    }
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            oxipng_path: Self::default_oxipng(),
            jpegtran_path: Self::default_jpegtran(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub route: RouteConfig,
    #[serde(default)]
    pub geojson: GeoJsonConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub postprocess: PostprocessConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置（文件可缺省），支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        tracing::info!("正在从 {:?} 加载配置文件", config_path);

        let builder = ConfigBuilder::builder()
            .add_source(File::from(config_path).required(false))
            // 支持环境变量覆盖，例如：APP_POOL__MAX_INSTANCES=4
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;

        tracing::debug!(
            "配置加载完成: pool.max_instances = {}, cache.max_bytes = {}",
            config.pool.effective_max_instances(),
            config.cache.max_bytes
        );

        Ok(config)
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<(), ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(())
    }

    /// 获取配置文件路径（可通过 APP_CONFIG_PATH 指定）
    fn get_config_path() -> PathBuf {
        std::env::var_os("APP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

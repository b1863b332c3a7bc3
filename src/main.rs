use staticmap_backend::features::render::RenderOrchestrator;
use staticmap_backend::shutdown::drain_pool;
use staticmap_backend::state::AppState;
use staticmap_backend::{AppConfig, ShutdownManager, build_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staticmap_backend=info,tower_http=info".into()),
        )
        .init();

    let shutdown_manager = ShutdownManager::new();

    if let Err(e) = AppConfig::init_global() {
        tracing::error!("配置加载失败: {}", e);
        std::process::exit(1);
    }
    let config = AppConfig::global();

    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let orchestrator = match RenderOrchestrator::from_config(config) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!("渲染编排器初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        max_instances = orchestrator.pool().max_instances(),
        backend = ?config.session.backend,
        managed_runtime = config.session.managed_runtime,
        cache = orchestrator.cache().is_some(),
        "会话池已就绪"
    );

    let app_state = AppState::new(orchestrator);
    let pool = app_state.orchestrator.pool().clone();
    let app = build_router(app_state, &config.api);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("监听地址绑定失败 {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Render API: http://{}{}/render", addr, config.api.prefix);

    let shutdown_timeout = config.shutdown.timeout_duration();
    let shutdown_signal = async move {
        let reason = shutdown_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅退出...", reason);

        // 先关闭会话池：排队请求立即失败，空闲会话销毁，避免遗留浏览器进程
        match drain_pool(&pool, shutdown_timeout).await {
            Ok(()) => tracing::info!("会话池已关闭"),
            Err(e) => tracing::warn!("{}，强制退出", e),
        }
    };

    let graceful = axum::serve(listener, app).with_graceful_shutdown(async {
        shutdown_signal.await;
        tracing::info!("开始优雅关闭HTTP服务器...");
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    tracing::info!("服务器已优雅关闭");
}

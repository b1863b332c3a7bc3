use std::sync::Arc;

use crate::features::render::RenderOrchestrator;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 渲染编排器（持有会话池与响应缓存）
    pub orchestrator: Arc<RenderOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: RenderOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

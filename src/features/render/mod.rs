//! 渲染编排：参数规范化、场景模板、截图后处理与 HTTP 入口。

pub mod handler;
pub mod options;
pub mod orchestrator;
pub mod postprocess;
pub mod scene;

pub use options::{GeoJsonSource, NormalizedOptions, RenderOptions};
pub use orchestrator::{RenderOrchestrator, RenderOutput};
pub use postprocess::PostProcessor;
pub use scene::{SceneBuilder, SceneView};

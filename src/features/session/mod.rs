//! 渲染会话：能力抽象（启动/页面/截图）、固定容量会话池，以及 Chrome DevTools 与 W3C WebDriver 两种后端。

pub mod chrome;
pub mod encode;
pub mod pool;
pub mod traits;
pub mod webdriver;

pub use pool::{PoolPhase, PoolStats, PooledSession, SessionPool};
pub use traits::{ImageFormat, RenderPage, RenderSession, SessionLauncher};
pub use chrome::ChromeLauncher;
pub use webdriver::WebDriverLauncher;

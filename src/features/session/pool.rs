use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use super::traits::{RenderPage, RenderSession, SessionLauncher};
use crate::config::PoolConfig;
use crate::error::{AppError, SessionError};

/// 会话池状态：只能单向前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum PoolPhase {
    Running,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub max_instances: usize,
    pub phase: PoolPhase,
}

type Ticket = oneshot::Sender<Result<PooledSession, AppError>>;

enum Admission {
    Slot(Option<IdleSession>),
    Queued(oneshot::Receiver<Result<PooledSession, AppError>>),
}

struct IdleSession {
    session: Box<dyn RenderSession>,
    uses: u32,
}

struct PoolState {
    phase: PoolPhase,
    active: usize,
    idle: Vec<IdleSession>,
    waiters: VecDeque<Ticket>,
}

struct PoolInner {
    launcher: Arc<dyn SessionLauncher>,
    max_instances: usize,
    launch_timeout: Duration,
    waiter_launch_attempts: u32,
    max_session_uses: u32,
    state: Mutex<PoolState>,
    closed_tx: watch::Sender<bool>,
}

/// 固定容量的渲染会话池。
///
/// - 同时借出的会话数不超过 `max_instances`；
/// - 容量耗尽时调用方按到达顺序（FIFO）排队；
/// - 计数、空闲集合与等待队列在同一把锁内修改，归还与移交给排队者是一次原子操作。
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

/// 借出的会话。必须通过 [`SessionPool::release`] 归还；
/// 未归还即被丢弃时在后台自动归还，保证容量不泄漏。
pub struct PooledSession {
    session: Option<Box<dyn RenderSession>>,
    uses: u32,
    pool: Arc<PoolInner>,
}

impl PooledSession {
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    pub async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError> {
        match &self.session {
            Some(s) => s.new_page().await,
            None => Err(SessionError::Disconnected("会话已归还".into())),
        }
    }

    /// 该会话被借出的次数（含本次）
    pub fn uses(&self) -> u32 {
        self.uses
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::warn!("会话未显式归还，自动回收");
        let pool = Arc::clone(&self.pool);
        let uses = self.uses;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.release_session(session, uses).await });
            }
            Err(_) => {
                let mut st = pool.lock();
                st.active = st.active.saturating_sub(1);
            }
        }
    }
}

/// 在借出流程被取消或失败时释放已占用的容量
struct SlotGuard {
    pool: Option<Arc<PoolInner>>,
}

impl SlotGuard {
    fn new(pool: &Arc<PoolInner>) -> Self {
        Self {
            pool: Some(Arc::clone(pool)),
        }
    }

    fn disarm(mut self) {
        self.pool = None;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.free_slot();
        }
    }
}

impl SessionPool {
    pub fn new(launcher: Arc<dyn SessionLauncher>, config: &PoolConfig) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(PoolInner {
                launcher,
                max_instances: config.effective_max_instances(),
                launch_timeout: config.launch_timeout(),
                waiter_launch_attempts: config.waiter_launch_attempts.max(1),
                max_session_uses: config.max_session_uses,
                state: Mutex::new(PoolState {
                    phase: PoolPhase::Running,
                    active: 0,
                    idle: Vec::new(),
                    waiters: VecDeque::new(),
                }),
                closed_tx,
            }),
        }
    }

    /// 借出一个会话；容量已满时排队等待，关闭中/已关闭时立即返回 [`AppError::PoolClosed`]。
    pub async fn acquire(&self) -> Result<PooledSession, AppError> {
        let admission = {
            let mut st = self.inner.lock();
            if st.phase != PoolPhase::Running {
                return Err(AppError::PoolClosed);
            }
            if st.active < self.inner.max_instances {
                st.active += 1;
                Admission::Slot(st.idle.pop())
            } else {
                let (tx, rx) = oneshot::channel();
                st.waiters.push_back(tx);
                tracing::debug!(waiting = st.waiters.len(), "会话池已满，排队等待");
                Admission::Queued(rx)
            }
        };

        match admission {
            Admission::Slot(idle) => {
                let guard = SlotGuard::new(&self.inner);
                let session = self.inner.obtain(idle).await?;
                guard.disarm();
                Ok(session)
            }
            Admission::Queued(rx) => rx.await.unwrap_or(Err(AppError::PoolClosed)),
        }
    }

    /// 归还会话。关闭中时直接销毁；断开或达到复用上限的会话销毁后释放容量。
    pub async fn release(&self, mut session: PooledSession) {
        if let Some(s) = session.session.take() {
            self.inner.release_session(s, session.uses).await;
        }
    }

    /// 进入关闭流程：拒绝所有排队请求、销毁所有空闲会话并等待销毁完成。
    ///
    /// 借出中的会话在归还时逐个销毁。重复调用会等待第一次调用完成。
    pub async fn shutdown(&self) {
        let drained = {
            let mut st = self.inner.lock();
            if st.phase == PoolPhase::Running {
                st.phase = PoolPhase::ShuttingDown;
                Some((
                    std::mem::take(&mut st.waiters),
                    std::mem::take(&mut st.idle),
                ))
            } else {
                None
            }
        };

        let Some((waiters, idle)) = drained else {
            let mut rx = self.inner.closed_tx.subscribe();
            let _ = rx.wait_for(|closed| *closed).await;
            return;
        };

        tracing::info!(
            rejected = waiters.len(),
            idle = idle.len(),
            "会话池开始关闭"
        );
        for tx in waiters {
            let _ = tx.send(Err(AppError::PoolClosed));
        }
        futures_util::future::join_all(idle.into_iter().map(|i| destroy(i.session))).await;

        self.inner.lock().phase = PoolPhase::Closed;
        self.inner.closed_tx.send_replace(true);
        tracing::info!("会话池已关闭");
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.inner.lock();
        PoolStats {
            active: st.active,
            idle: st.idle.len(),
            waiting: st.waiters.len(),
            max_instances: self.inner.max_instances,
            phase: st.phase,
        }
    }

    pub fn max_instances(&self) -> usize {
        self.inner.max_instances
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 复用空闲会话（断开则销毁后重启），或启动新会话。调用前已占用一个容量。
    async fn obtain(self: &Arc<Self>, idle: Option<IdleSession>) -> Result<PooledSession, AppError> {
        if let Some(idle) = idle {
            if idle.session.is_connected() {
                return Ok(PooledSession {
                    session: Some(idle.session),
                    uses: idle.uses + 1,
                    pool: Arc::clone(self),
                });
            }
            tracing::info!("空闲会话已断开，重新启动");
            destroy(idle.session).await;
        }

        let session = self.launch().await?;
        Ok(PooledSession {
            session: Some(session),
            uses: 1,
            pool: Arc::clone(self),
        })
    }

    async fn launch(&self) -> Result<Box<dyn RenderSession>, AppError> {
        match tokio::time::timeout(self.launch_timeout, self.launcher.launch()).await {
            Ok(Ok(session)) => {
                tracing::info!("渲染会话已启动");
                Ok(session)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "渲染会话启动失败");
                Err(AppError::Session(e))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.launch_timeout, "渲染会话启动超时");
                Err(AppError::Session(SessionError::Launch(format!(
                    "启动超时 ({}s)",
                    self.launch_timeout.as_secs()
                ))))
            }
        }
    }

    async fn release_session(self: &Arc<Self>, session: Box<dyn RenderSession>, uses: u32) {
        let to_destroy = {
            let mut st = self.lock();
            let retired = self.max_session_uses > 0 && uses >= self.max_session_uses;
            let destroy_now =
                st.phase != PoolPhase::Running || retired || !session.is_connected();

            let to_destroy = if destroy_now {
                Some(session)
            } else {
                st.idle.push(IdleSession { session, uses });
                None
            };
            st.active = st.active.saturating_sub(1);
            self.dispatch_locked(&mut st);
            to_destroy
        };

        if let Some(session) = to_destroy {
            destroy(session).await;
        }
    }

    fn free_slot(self: &Arc<Self>) {
        let mut st = self.lock();
        st.active = st.active.saturating_sub(1);
        self.dispatch_locked(&mut st);
    }

    /// 有空余容量时按 FIFO 把容量交给排队者。必须在持锁状态下调用。
    fn dispatch_locked(self: &Arc<Self>, st: &mut PoolState) {
        while st.phase == PoolPhase::Running && st.active < self.max_instances {
            let Some(ticket) = st.waiters.pop_front() else {
                break;
            };
            if ticket.is_closed() {
                continue;
            }
            st.active += 1;
            let idle = st.idle.pop();
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.serve_ticket(ticket, idle).await });
        }
    }

    /// 为出队的排队者借出会话；启动失败时有限次重试，全部失败则以错误应答并释放容量。
    async fn serve_ticket(self: Arc<Self>, ticket: Ticket, idle: Option<IdleSession>) {
        let guard = SlotGuard::new(&self);
        let mut idle = idle;
        let mut last_err = AppError::PoolClosed;

        for attempt in 1..=self.waiter_launch_attempts {
            if self.lock().phase != PoolPhase::Running {
                last_err = AppError::PoolClosed;
                break;
            }
            match self.obtain(idle.take()).await {
                Ok(session) => {
                    guard.disarm();
                    if self.lock().phase != PoolPhase::Running {
                        let _ = ticket.send(Err(AppError::PoolClosed));
                        drop_into_release(&self, session).await;
                        return;
                    }
                    if let Err(Ok(session)) = ticket.send(Ok(session)) {
                        tracing::debug!("排队者已离开，归还会话");
                        drop_into_release(&self, session).await;
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "为排队请求借出会话失败");
                    last_err = e;
                }
            }
        }

        let _ = ticket.send(Err(last_err));
        drop(guard);
    }
}

async fn drop_into_release(pool: &Arc<PoolInner>, mut session: PooledSession) {
    if let Some(s) = session.session.take() {
        pool.release_session(s, session.uses).await;
    }
}

async fn destroy(session: Box<dyn RenderSession>) {
    match session.close().await {
        Ok(()) => tracing::info!("渲染会话已销毁"),
        Err(e) => tracing::warn!(error = %e, "销毁渲染会话失败"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::cache::RequestInterceptor;
    use crate::features::session::ImageFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeSession {
        connected: AtomicBool,
        closed: Arc<AtomicUsize>,
    }

    struct FakePage;

    #[async_trait]
    impl RenderPage for FakePage {
        async fn set_viewport(&mut self, _: u32, _: u32) -> Result<(), SessionError> {
            Ok(())
        }
        async fn intercept_requests(&mut self, _: Arc<dyn RequestInterceptor>) -> Result<(), SessionError> {
            Ok(())
        }
        async fn load_content(&mut self, _: &str) -> Result<(), SessionError> {
            Ok(())
        }
        async fn wait_for(&mut self, _: &str, _: Duration) -> Result<(), SessionError> {
            Ok(())
        }
        async fn screenshot(&mut self, _: ImageFormat, _: u8) -> Result<Vec<u8>, SessionError> {
            Ok(vec![])
        }
        async fn close(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[async_trait]
    impl RenderSession for FakeSession {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn new_page(&self) -> Result<Box<dyn RenderPage>, SessionError> {
            Ok(Box::new(FakePage))
        }
        async fn close(&self) -> Result<(), SessionError> {
            self.connected.store(false, Ordering::SeqCst);
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launched: AtomicUsize,
        closed: Arc<AtomicUsize>,
        fail_next: AtomicUsize,
    }

    #[async_trait]
    impl SessionLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn RenderSession>, SessionError> {
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SessionError::Launch("boom".into()));
            }
            self.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                connected: AtomicBool::new(true),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn pool_with(launcher: Arc<FakeLauncher>, max: u32, max_uses: u32) -> SessionPool {
        let cfg = PoolConfig {
            max_instances: max,
            max_session_uses: max_uses,
            ..PoolConfig::default()
        };
        SessionPool::new(launcher, &cfg)
    }

    #[tokio::test]
    async fn released_session_is_reused() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = pool_with(launcher.clone(), 1, 0);

        let s = pool.acquire().await.expect("first");
        pool.release(s).await;
        let s = pool.acquire().await.expect("second");
        assert_eq!(s.uses(), 2);
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
        pool.release(s).await;
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn launch_failure_frees_capacity() {
        let launcher = Arc::new(FakeLauncher::default());
        launcher.fail_next.store(1, Ordering::SeqCst);
        let pool = pool_with(launcher.clone(), 1, 0);

        assert!(matches!(pool.acquire().await, Err(AppError::Session(_))));
        assert_eq!(pool.stats().active, 0);
        let s = pool.acquire().await.expect("capacity restored");
        pool.release(s).await;
    }

    #[tokio::test]
    async fn retired_session_is_destroyed_on_release() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = pool_with(launcher.clone(), 1, 1);

        let s = pool.acquire().await.expect("acquire");
        pool.release(s).await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(launcher.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_session_returns_capacity() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = pool_with(launcher.clone(), 1, 0);

        let s = pool.acquire().await.expect("acquire");
        drop(s);
        let again = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("not stalled")
            .expect("acquire");
        pool.release(again).await;
    }

    #[tokio::test]
    async fn acquire_after_shutdown_fails() {
        let launcher = Arc::new(FakeLauncher::default());
        let pool = pool_with(launcher, 2, 0);
        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(pool.stats().phase, PoolPhase::Closed);
        assert!(matches!(pool.acquire().await, Err(AppError::PoolClosed)));
    }
}

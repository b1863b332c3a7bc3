use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

/// 缓存的一条 HTTP 响应
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// 按响应头的 `cache-control: max-age` 构造；max-age 缺失或为 0 时不可缓存，返回 `None`。
    pub fn from_response(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Option<Self> {
        let max_age = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cache-control"))
            .find_map(|(_, v)| parse_max_age(v))?;
        if max_age == 0 {
            return None;
        }
        Some(Self {
            status,
            headers,
            body,
            expires_at: Instant::now() + Duration::from_secs(max_age),
        })
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// 从 cache-control 取 `max-age=N`（大小写不敏感，忽略 `s-maxage`）
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub max_bytes: u64,
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    current_bytes: u64,
}

/// 按字节数限额的 LRU 响应缓存，键为请求 URL。
///
/// 所有修改在同一把锁内完成；过期条目读取时视为不存在，但只在 LRU 淘汰或覆盖时才释放字节。
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    max_bytes: u64,
}

impl ResponseCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                current_bytes: 0,
            }),
            max_bytes,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_bytes)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // 锁内不会 panic，中毒后继续使用内部数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 命中未过期条目时刷新其访问顺序；过期条目不刷新
    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut inner = self.lock();
        if !inner.entries.peek(url)?.is_live(now) {
            tracing::debug!(url, "缓存条目已过期");
            return None;
        }
        inner.entries.get(url).cloned()
    }

    pub fn has(&self, url: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .peek(url)
            .is_some_and(|e| e.is_live(now))
    }

    /// 写入条目，必要时按访问顺序淘汰最久未使用的条目。
    ///
    /// 单条超过总预算的条目不写入，返回 `false`。
    pub fn set(&self, url: String, entry: CacheEntry) -> bool {
        let size = entry.size();
        if size > self.max_bytes {
            tracing::debug!(url = %url, size, max = self.max_bytes, "条目超过缓存上限，跳过");
            return false;
        }

        let mut inner = self.lock();
        if let Some(old) = inner.entries.pop(&url) {
            inner.current_bytes -= old.size();
        }
        while inner.current_bytes + size > self.max_bytes {
            let Some((evicted_url, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.current_bytes -= evicted.size();
            tracing::debug!(url = %evicted_url, size = evicted.size(), "LRU 淘汰");
        }
        inner.current_bytes += size;
        inner.entries.put(url, entry);
        true
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.current_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.current_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

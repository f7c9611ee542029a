//! Render cache.
//!
//! [`CacheStore`] is the backend contract, with an in-process
//! ([`MemoryCache`]) and a Redis ([`RedisCache`]) implementation that behave
//! the same from the caller's side. [`PageCache`] sits on top and owns the
//! key scheme and the policy that a broken cache is just a miss.

mod memory;
mod redis_cache;

pub use self::memory::{CacheSweeper, MemoryCache};
pub use self::redis_cache::RedisCache;

use crate::data::{PageData, UserId};
use crate::error::CacheError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
    Expired,
}

impl CacheLookup {
    /// Expired and missing entries are the same thing to callers.
    pub fn into_value(self) -> Option<String> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Miss | Self::Expired => None,
        }
    }
}

/// Key/value store with per-entry expiration.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Which backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Upper bound accepted for configured TTLs (30 days).
pub const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Redis connection URL (redis backend only)
    pub redis_url: String,
    /// How often the in-process backend purges expired entries
    pub sweep_interval_secs: u64,
    /// TTL of rendered pages
    pub page_ttl_secs: u64,
    /// TTL of fetched page data
    pub data_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: String::from("redis://127.0.0.1:6379"),
            sweep_interval_secs: 60,
            page_ttl_secs: 300,
            data_ttl_secs: 60,
        }
    }
}

/// Page cache key: `page:{path}:user:{id}` or `page:{path}:guest`.
pub fn page_key(path: &str, user: Option<UserId>) -> String {
    scoped_key("page", path, user)
}

/// Page data cache key: `data:{path}:user:{id}` or `data:{path}:guest`.
pub fn data_key(path: &str, user: Option<UserId>) -> String {
    scoped_key("data", path, user)
}

fn scoped_key(kind: &str, path: &str, user: Option<UserId>) -> String {
    match user {
        Some(id) => format!("{}:{}:user:{}", kind, path, id),
        None => format!("{}:{}:guest", kind, path),
    }
}

/// A built backend plus the sweeper that must be stopped with it.
pub struct CacheHandle {
    pub store: Arc<dyn CacheStore>,
    pub sweeper: Option<CacheSweeper>,
}

/// Build the configured backend. An unreachable Redis falls back to the
/// in-process backend so rendering keeps working.
pub async fn connect(config: &CacheConfig) -> CacheHandle {
    let interval = Duration::from_secs(config.sweep_interval_secs.max(1));

    if config.backend == CacheBackend::Redis {
        match RedisCache::connect(&config.redis_url).await {
            Ok(cache) => {
                tracing::info!(url = %config.redis_url, "using redis cache backend");
                return CacheHandle {
                    store: Arc::new(cache),
                    sweeper: None,
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unavailable, falling back to in-process cache");
            }
        }
    }

    let memory = Arc::new(MemoryCache::new());
    let sweeper = CacheSweeper::start(Arc::clone(&memory), interval);
    CacheHandle {
        store: memory,
        sweeper: Some(sweeper),
    }
}

/// Page and page-data caching over any [`CacheStore`].
///
/// Every backend error is logged and reported as a miss; rendering never
/// fails because of the cache.
#[derive(Clone)]
pub struct PageCache {
    store: Arc<dyn CacheStore>,
    page_ttl: Duration,
    data_ttl: Duration,
}

impl PageCache {
    pub fn new(store: Arc<dyn CacheStore>, page_ttl: Duration, data_ttl: Duration) -> Self {
        Self {
            store,
            page_ttl,
            data_ttl,
        }
    }

    pub fn from_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.page_ttl_secs),
            Duration::from_secs(config.data_ttl_secs),
        )
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get_page(&self, path: &str, user: Option<UserId>) -> Option<String> {
        self.read(&page_key(path, user)).await
    }

    pub async fn set_page(&self, path: &str, user: Option<UserId>, html: &str) {
        self.write(&page_key(path, user), html, self.page_ttl).await;
    }

    pub async fn get_data(&self, path: &str, user: Option<UserId>) -> Option<PageData> {
        let key = data_key(path, user);
        let raw = self.read(&key).await?;
        match serde_json::from_str(&raw) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cached page data");
                None
            }
        }
    }

    pub async fn set_data(&self, path: &str, user: Option<UserId>, data: &PageData) {
        let key = data_key(path, user);
        match serde_json::to_string(data) {
            Ok(raw) => self.write(&key, &raw, self.data_ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "page data not cacheable"),
        }
    }

    /// Drop cached pages and data of `user` for each of `paths`.
    pub async fn invalidate_user<'a>(&self, user: UserId, paths: impl IntoIterator<Item = &'a str>) {
        for path in paths {
            for key in [page_key(path, Some(user)), data_key(path, Some(user))] {
                if let Err(e) = self.store.delete(&key).await {
                    tracing::warn!(key = %key, error = %e, "cache delete failed");
                }
            }
        }
    }

    async fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(lookup) => {
                tracing::debug!(
                    key = %key,
                    backend = self.store.backend(),
                    hit = matches!(lookup, CacheLookup::Hit(_)),
                    "cache lookup"
                );
                lookup.into_value()
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.store.set(key, value, ttl).await {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
    }
}

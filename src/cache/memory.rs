//! In-process cache backend and its expiration sweeper.

use super::{CacheLookup, CacheStore};
use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// None when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// RW-guarded map with per-entry expiration.
///
/// Reads filter expired entries without taking the write lock; physical
/// removal is the sweeper's job.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<CacheLookup, CacheError> {
        let entries = self.entries.read().await;
        Ok(match entries.get(key) {
            None => CacheLookup::Miss,
            Some(entry) if entry.is_expired(Instant::now()) => CacheLookup::Expired,
            Some(entry) => CacheLookup::Hit(entry.value.clone()),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Background task purging expired entries on a fixed interval.
///
/// Runs until [`CacheSweeper::stop`] is awaited; dropping the handle without
/// stopping also cancels the task.
pub struct CacheSweeper {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Spawn the sweeper on the current tokio runtime.
    pub fn start(cache: Arc<MemoryCache>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; nothing can have expired yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "cache sweep removed expired entries");
                        }
                    }
                }
            }
        });

        tracing::debug!(interval_ms = interval.as_millis() as u64, "cache sweeper started");
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the task and wait for it to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "cache sweeper ended abnormally");
            }
        }
        tracing::debug!("cache sweeper stopped");
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

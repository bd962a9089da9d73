//! Process-wide cache and lock service
//!
//! Serverless launches and declaration lookups go through a shared cache
//! service that also provides named locks with a TTL. The trait keeps the
//! backing store injectable; the in-memory implementation backs tests and
//! single-node deployments.

use crate::core::error::{HarborError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Key/value cache with named TTL locks
#[async_trait]
pub trait CacheService: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Acquire a named lock.
    ///
    /// The lock auto-expires after `ttl`. Acquisition waits up to `wait`
    /// before failing with a timeout error.
    async fn lock(&self, key: &str, ttl: Duration, wait: Duration) -> Result<()>;

    async fn unlock(&self, key: &str) -> Result<()>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory cache backend
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    locks: Mutex<HashMap<String, Instant>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheService for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) => {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() >= expires_at {
                        entries.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn lock(&self, key: &str, ttl: Duration, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut locks = self.locks.lock().await;
                let now = Instant::now();
                let held = locks.get(key).map(|expiry| *expiry > now).unwrap_or(false);
                if !held {
                    locks.insert(key.to_string(), now + ttl);
                    debug!(key, "lock acquired");
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(HarborError::Timeout(format!(
                    "failed to acquire lock {} within {:?}",
                    key, wait
                )));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        self.locks.lock().await.remove(key);
        debug!(key, "lock released");
        Ok(())
    }
}

/// Guard that releases a cache lock when dropped from an async scope
pub struct CacheLockGuard<'a> {
    cache: &'a dyn CacheService,
    key: String,
}

impl<'a> CacheLockGuard<'a> {
    /// Acquire `key` and return a guard; call [`release`](Self::release) on all exit paths
    pub async fn acquire(
        cache: &'a dyn CacheService,
        key: impl Into<String>,
        ttl: Duration,
        wait: Duration,
    ) -> Result<CacheLockGuard<'a>> {
        let key = key.into();
        cache.lock(&key, ttl, wait).await?;
        Ok(Self { cache, key })
    }

    pub async fn release(self) -> Result<()> {
        self.cache.unlock(&self.key).await
    }
}

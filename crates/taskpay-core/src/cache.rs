//! Local read cache.
//!
//! Latency only: ledger decisions always go through the store's
//! compare-and-swap, never through cached values. Concurrent loads of the
//! same key share one in-flight store read.

use crate::store::StoreResult;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Deferred store read handed to [`CachePort::get_or_load`].
pub type CacheLoad = BoxFuture<'static, StoreResult<Option<Value>>>;

/// Cache capability injected into the engine.
#[async_trait]
pub trait CachePort: Send + Sync {
    /// Return a fresh cached value, or run `loader` (shared with concurrent callers).
    async fn get_or_load(&self, key: &str, loader: CacheLoad) -> StoreResult<Option<Value>>;

    async fn put(&self, key: &str, value: Value);

    async fn invalidate(&self, key: &str);

    async fn invalidate_prefix(&self, prefix: &str);

    /// Drop everything, e.g. on logout.
    async fn clear(&self);
}

enum Slot {
    Ready {
        value: Option<Value>,
        expires_at: Instant,
    },
    Loading {
        load: Shared<CacheLoad>,
        generation: u64,
    },
}

/// Time-expiring cache with in-flight request sharing.
pub struct TtlReadCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl TtlReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CachePort for TtlReadCache {
    async fn get_or_load(&self, key: &str, loader: CacheLoad) -> StoreResult<Option<Value>> {
        let (load, generation) = {
            let mut slots = self.slots.lock().await;
            match slots.get(key) {
                Some(Slot::Ready { value, expires_at }) if *expires_at > Instant::now() => {
                    return Ok(value.clone());
                }
                Some(Slot::Loading { load, generation }) => (load.clone(), *generation),
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let load = loader.shared();
                    slots.insert(
                        key.to_string(),
                        Slot::Loading {
                            load: load.clone(),
                            generation,
                        },
                    );
                    (load, generation)
                }
            }
        };

        let result = load.await;

        let mut slots = self.slots.lock().await;
        // An invalidation during the load removed or replaced the slot; keep the newer state.
        let still_ours = matches!(
            slots.get(key),
            Some(Slot::Loading { generation: current, .. }) if *current == generation
        );
        if still_ours {
            match &result {
                Ok(value) => {
                    slots.insert(
                        key.to_string(),
                        Slot::Ready {
                            value: value.clone(),
                            expires_at: Instant::now() + self.ttl,
                        },
                    );
                }
                Err(_) => {
                    slots.remove(key);
                }
            }
        }
        result
    }

    async fn put(&self, key: &str, value: Value) {
        self.slots.lock().await.insert(
            key.to_string(),
            Slot::Ready {
                value: Some(value),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.slots.lock().await.remove(key);
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        self.slots
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));
    }

    async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}

/// Pass-through cache used when caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CachePort for NoopCache {
    async fn get_or_load(&self, _key: &str, loader: CacheLoad) -> StoreResult<Option<Value>> {
        loader.await
    }

    async fn put(&self, _key: &str, _value: Value) {}

    async fn invalidate(&self, _key: &str) {}

    async fn invalidate_prefix(&self, _prefix: &str) {}

    async fn clear(&self) {}
}

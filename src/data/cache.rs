//! Latest-value cache with per-entry TTL.
//!
//! The processor publishes each symbol's most recent snapshot and price
//! here so downstream readers never touch the hot path.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::StoreError;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Option<Value>;
    /// Drops expired entries, returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

pub struct MemoryTtlCache {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryTtlCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryTtlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryTtlCache {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.1 > Instant::now() {
                    return Some(entry.0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    async fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, (_, deadline)| *deadline > now);
        before - self.entries.len()
    }
}

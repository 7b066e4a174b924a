//! TTL + LRU cache with a per-key increment log.
//!
//! Used by the compute engine to avoid recomputing fresh analyses and to
//! keep a short history of results per key.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CacheConfig;

struct Entry<T> {
    value: T,
    inserted: Instant,
    last_access: Instant,
    log: VecDeque<T>,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    sweeper: Option<JoinHandle<()>>,
}

#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Clone)]
pub struct IncrementalCache<T> {
    config: CacheConfig,
    inner: Arc<Mutex<Inner<T>>>,
    running: Arc<AtomicBool>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl<T: Clone + Send + 'static> IncrementalCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                sweeper: None,
            })),
            running: Arc::new(AtomicBool::new(false)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Inserts or refreshes a key. The previous value for the key is kept
    /// in a bounded increment log. When the cache is at capacity the least
    /// recently used entry is evicted first.
    pub async fn put(&self, key: &str, value: T) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.log.len() >= self.config.log_capacity {
                entry.log.pop_front();
            }
            let previous = std::mem::replace(&mut entry.value, value);
            entry.log.push_back(previous);
            entry.inserted = now;
            entry.last_access = now;
            return;
        }

        if inner.entries.len() >= self.config.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("[CACHE] Evicted LRU entry '{}'", lru_key);
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted: now,
                last_access: now,
                log: VecDeque::new(),
            },
        );
    }

    /// Returns the value unless it is older than the TTL. Expired entries
    /// are removed on the spot.
    pub async fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock().await;
        let ttl = Duration::from_secs(self.config.ttl_secs);
        match inner.entries.get_mut(key) {
            Some(entry) if entry.inserted.elapsed() <= ttl => {
                entry.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns the value only if it was inserted within `freshness`.
    pub async fn get_fresh(&self, key: &str, freshness: Duration) -> Option<T> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(key) {
            Some(entry) if entry.inserted.elapsed() <= freshness => {
                entry.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Prior values for the key, oldest first.
    pub async fn increments(&self, key: &str) -> Vec<T> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .map(|e| e.log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.inserted.elapsed() <= ttl);
        before - inner.entries.len()
    }

    /// Starts the background sweep task.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let me = self.clone();
        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs_f64(me.config.sweep_interval_secs);
            while me.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !me.running.load(Ordering::SeqCst) {
                    break;
                }
                let swept = me.sweep().await;
                if swept > 0 {
                    info!("[CACHE] Sweep removed {} expired entries", swept);
                }
            }
        });
        self.inner.lock().await.sweeper = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.inner.lock().await.sweeper.take();
        if let Some(handle) = handle {
            handle.abort();
            handle.await.ok();
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.inner.lock().await.entries.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

//! Pool of supervised connections with failover and optional round-robin
//! selection.

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::PoolConfig;

use super::manager::{ConnectionManager, ConnectionStatus};

pub struct ConnectionPool {
    config: PoolConfig,
    managers: Vec<ConnectionManager>,
    next: Mutex<usize>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, managers: Vec<ConnectionManager>) -> Self {
        Self {
            config,
            managers,
            next: Mutex::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub async fn start_all(&self) {
        for manager in &self.managers {
            manager.start().await;
        }
        info!("[POOL] Started {} connections", self.managers.len());
    }

    pub async fn stop_all(&self) {
        for manager in &self.managers {
            manager.stop().await;
        }
        info!("[POOL] Stopped {} connections", self.managers.len());
    }

    /// Picks a connection for the next operation. Round-robin over healthy
    /// connections when load balancing is on; otherwise the first healthy
    /// one, falling back to the primary so callers always get something to
    /// fail against.
    pub async fn acquire(&self) -> Option<&ConnectionManager> {
        if self.managers.is_empty() {
            return None;
        }

        if self.config.load_balance_enabled {
            let mut next = self.next.lock().await;
            for _ in 0..self.managers.len() {
                let candidate = &self.managers[*next % self.managers.len()];
                *next = (*next + 1) % self.managers.len();
                if candidate.is_healthy().await {
                    return Some(candidate);
                }
            }
        } else {
            for manager in &self.managers {
                if manager.is_healthy().await {
                    return Some(manager);
                }
            }
        }

        if self.config.failover_enabled {
            warn!("[POOL] No healthy connection, falling back to primary");
        }
        self.managers.first()
    }

    pub async fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut out = Vec::with_capacity(self.managers.len());
        for manager in &self.managers {
            out.push(manager.status().await);
        }
        out
    }

    pub async fn healthy_count(&self) -> usize {
        let mut count = 0;
        for manager in &self.managers {
            if manager.is_healthy().await {
                count += 1;
            }
        }
        count
    }
}

//! Shared counter store used by the rate limiter.
//!
//! # Responsibilities
//! - Atomic increment-with-expiry of windowed counters
//! - Liveness probe for readiness checks
//!
//! # Design Decisions
//! - Expiry is set only when a counter is created (0 → 1), giving fixed windows
//! - The in-process store doubles as the degraded-mode fallback for a remote one
//! - Expired windows are dropped lazily on access and by a periodic sweep

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::clock::SharedClock;

/// Result of incrementing a windowed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    /// Counter value after the increment.
    pub count: u64,
    /// Time until the window expires.
    pub ttl_remaining: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store did not answer within {}ms", .0.as_millis())]
    Timeout(Duration),
}

/// Backend holding rate-limit counters, shared across instances.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Atomically increment `key`, starting a window of length `window` if
    /// the counter did not exist.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError>;

    /// Give back one hit. A missing or expired counter is left alone.
    async fn decrement(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and health output.
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    expires_at: u64,
}

/// In-process counter store.
#[derive(Debug)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    clock: SharedClock,
}

impl MemoryCounterStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Synchronous increment; the entry lock makes read-modify-write atomic per key.
    pub fn hit(&self, key: &str, window: Duration) -> CounterHit {
        let now = self.clock.now_ms();
        let window_ms = window.as_millis() as u64;

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now.saturating_add(window_ms),
        });
        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now.saturating_add(window_ms),
            };
        }
        entry.count += 1;

        CounterHit {
            count: entry.count,
            ttl_remaining: Duration::from_millis(entry.expires_at - now),
        }
    }

    pub fn give_back(&self, key: &str) {
        let now = self.clock.now_ms();
        if let Some(mut entry) = self.windows.get_mut(key) {
            if entry.expires_at > now {
                entry.count = entry.count.saturating_sub(1);
            }
        }
    }

    /// Drop expired windows. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError> {
        Ok(self.hit(key, window))
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        self.give_back(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

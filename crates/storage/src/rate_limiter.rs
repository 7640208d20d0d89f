//! Rate-limit window storage.
//!
//! A [`RateLimitWindow`] counts requests for one `(identity-or-ip, endpoint)`
//! key inside a fixed window. The counting rule lives on the window itself so
//! every [`WindowStore`] implementation applies it identically:
//!
//! - no window yet, or `now - window_start >= window` → start over with `count = 1`
//! - otherwise → `count += 1`
//!
//! [`MemoryWindowStore`] keeps windows in a concurrent [`moka`] cache. Each
//! key owns its own mutex, so increments for the same key are serialized and
//! never lost, while different keys proceed in parallel. Windows that see no
//! traffic for the configured idle period are evicted automatically, and the
//! number of tracked keys is capacity-bounded.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use chrono::Utc;
//! use estate_gate_storage::rate_limiter::{MemoryWindowStore, WindowStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryWindowStore::new(Duration::from_secs(600), 100_000);
//! let snapshot = store.hit("sub:user-1|create_property", Duration::from_secs(60), Utc::now()).await?;
//! assert_eq!(snapshot.count, 1);
//! # Ok::<(), estate_gate_storage::StorageError>(())
//! # });
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use moka::sync::Cache;
use parking_lot::Mutex;

use crate::error::StorageResult;

/// Default idle period after which an untouched window is evicted.
pub const DEFAULT_IDLE_EVICTION: Duration = Duration::from_secs(600);

/// Default maximum number of tracked rate-limit keys.
pub const DEFAULT_MAX_KEYS: u64 = 100_000;

/// Counter state for a single rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Requests seen in the current window.
    pub count: u64,
    window_start: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Creates an empty window; the first [`record`](Self::record) opens it.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { count: 0, window_start: now }
    }

    /// Records one request at `now` and returns the resulting snapshot.
    pub fn record(&mut self, window: Duration, now: DateTime<Utc>) -> WindowSnapshot {
        if self.count == 0 || self.is_expired(window, now) {
            self.count = 1;
            self.window_start = now;
        } else {
            self.count = self.count.saturating_add(1);
        }
        WindowSnapshot { count: self.count, window_start: self.window_start }
    }

    /// Returns `true` once `now - window_start >= window`.
    #[must_use]
    pub fn is_expired(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.window_start) >= window_delta(window)
    }
}

/// Result of recording a request: the count inside the current window and
/// when that window started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests seen in the current window, including this one.
    pub count: u64,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
}

impl WindowSnapshot {
    /// Time left until the window containing this snapshot expires.
    #[must_use]
    pub fn remaining_in_window(&self, window: Duration, now: DateTime<Utc>) -> Duration {
        // Saturating on both ends; `window_start + window` may not be representable.
        let elapsed = now.signed_duration_since(self.window_start).to_std().unwrap_or(Duration::ZERO);
        window.saturating_sub(elapsed)
    }
}

fn window_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

/// Concurrency-safe storage for rate-limit windows.
///
/// In-process implementations must make [`hit`](Self::hit) atomic per key.
/// Shared (remote) implementations may allow a bounded overshoot of
/// `max_requests + concurrent requests in flight` when they cannot increment
/// atomically; see the crate design notes.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Records one request for `key` at `now` using a window of `window`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`](crate::StorageError) if the counter store is
    /// unreachable.
    async fn hit(&self, key: &str, window: Duration, now: DateTime<Utc>)
    -> StorageResult<WindowSnapshot>;
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for Arc<S> {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowSnapshot> {
        (**self).hit(key, window, now).await
    }
}

/// In-process [`WindowStore`] backed by a [`moka::sync::Cache`].
///
/// Limits are per process: in a multi-process deployment each process counts
/// independently.
#[derive(Clone)]
pub struct MemoryWindowStore {
    windows: Cache<String, Arc<Mutex<RateLimitWindow>>>,
}

impl std::fmt::Debug for MemoryWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWindowStore")
            .field("tracked_keys", &self.windows.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryWindowStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_EVICTION, DEFAULT_MAX_KEYS)
    }
}

impl MemoryWindowStore {
    /// Creates a store evicting windows idle for `idle_eviction` and tracking
    /// at most `max_keys` keys.
    #[must_use]
    pub fn new(idle_eviction: Duration, max_keys: u64) -> Self {
        let windows = Cache::builder().max_capacity(max_keys).time_to_idle(idle_eviction).build();
        Self { windows }
    }

    /// Approximate number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> u64 {
        self.windows.entry_count()
    }

    /// Runs pending eviction work immediately.
    pub fn run_pending_tasks(&self) {
        self.windows.run_pending_tasks();
    }

    /// Returns the current state of `key` without recording a request.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows.get(key).map(|w| *w.lock())
    }

    fn hit_blocking(&self, key: &str, window: Duration, now: DateTime<Utc>) -> WindowSnapshot {
        let slot =
            self.windows.get_with_by_ref(key, || Arc::new(Mutex::new(RateLimitWindow::new(now))));
        let mut state = slot.lock();
        state.record(window, now)
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<WindowSnapshot> {
        Ok(self.hit_blocking(key, window, now))
    }
}

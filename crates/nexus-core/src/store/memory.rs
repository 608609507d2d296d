//! In-process store with clock-driven expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::{glob_match, KeyValueStore, StoreFuture, WindowOutcome, WindowRequest};
use crate::clock::{duration_to_millis, Clock, SystemClock};

#[derive(Debug, Clone)]
struct ValueEntry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct WindowEntry {
    stamps: VecDeque<i64>,
    expires_at: Option<i64>,
}

/// How often writes sweep out entries that nobody reads again.
const SWEEP_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, ValueEntry>,
    windows: HashMap<String, WindowEntry>,
    next_sweep_at: i64,
}

impl MemoryInner {
    fn sweep_if_due(&mut self, now: i64) {
        if now >= self.next_sweep_at {
            self.clear_expired(now);
            self.next_sweep_at = now + SWEEP_INTERVAL_MS;
        }
    }

    fn live_value(&self, key: &str, now: i64) -> Option<&ValueEntry> {
        self.values
            .get(key)
            .filter(|entry| entry.expires_at.map_or(true, |at| now < at))
    }

    fn live_window(&self, key: &str, now: i64) -> bool {
        self.windows
            .get(key)
            .is_some_and(|entry| entry.expires_at.map_or(true, |at| now < at))
    }

    fn clear_expired(&mut self, now: i64) {
        self.values
            .retain(|_, entry| entry.expires_at.map_or(true, |at| now < at));
        self.windows
            .retain(|_, entry| entry.expires_at.map_or(true, |at| now < at));
    }
}

/// Thread-safe in-memory implementation of [`KeyValueStore`].
///
/// Expiry is evaluated lazily against the injected [`Clock`], so tests can
/// move time with [`ManualClock`](crate::clock::ManualClock).
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
            clock,
        }
    }

    /// Drops every expired entry.
    pub async fn clear_expired(&self) {
        let now = self.clock.now_millis();
        self.inner.write().await.clear_expired(now);
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.values.clear();
        inner.windows.clear();
    }

    /// Number of stored value entries, including expired ones not yet cleared.
    pub async fn len(&self) -> usize {
        self.inner.read().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of tracked rate-limit windows, including expired ones not yet swept.
    pub async fn window_count(&self) -> usize {
        self.inner.read().await.windows.len()
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.filter(|ttl| !ttl.is_zero())
            .map(|ttl| self.clock.now_millis() + duration_to_millis(ttl))
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            {
                let inner = self.inner.read().await;
                match inner.values.get(key) {
                    None => return Ok(None),
                    Some(entry) if entry.expires_at.map_or(true, |at| now < at) => {
                        return Ok(Some(entry.value.clone()));
                    }
                    Some(_) => {}
                }
            }

            let mut inner = self.inner.write().await;
            if inner.live_value(key, now).is_none() {
                inner.values.remove(key);
            }
            Ok(inner.live_value(key, now).map(|entry| entry.value.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = self.expiry(ttl);
            let mut inner = self.inner.write().await;
            inner.sweep_if_due(self.clock.now_millis());
            inner
                .values
                .insert(key.to_owned(), ValueEntry { value, expires_at });
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let mut inner = self.inner.write().await;
            let was_live = inner.live_value(key, now).is_some() || inner.live_window(key, now);
            inner.values.remove(key);
            inner.windows.remove(key);
            Ok(was_live)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let inner = self.inner.read().await;
            Ok(inner.live_value(key, now).is_some() || inner.live_window(key, now))
        })
    }

    fn delete_pattern<'a>(&'a self, pattern: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let mut inner = self.inner.write().await;
            inner.clear_expired(now);

            let before = inner.values.len() + inner.windows.len();
            inner.values.retain(|key, _| !glob_match(pattern, key));
            inner.windows.retain(|key, _| !glob_match(pattern, key));
            let after = inner.values.len() + inner.windows.len();

            Ok((before - after) as u64)
        })
    }

    fn admit_in_window<'a>(
        &'a self,
        key: &'a str,
        request: WindowRequest,
    ) -> StoreFuture<'a, WindowOutcome> {
        Box::pin(async move {
            let now = request.now_millis;
            let window_start = request.window_start_millis();
            let mut inner = self.inner.write().await;
            inner.sweep_if_due(now);

            if !inner.live_window(key, now) {
                inner.windows.remove(key);
            }

            let retained = match inner.windows.get_mut(key) {
                Some(entry) => {
                    while entry.stamps.front().is_some_and(|stamp| *stamp <= window_start) {
                        entry.stamps.pop_front();
                    }
                    entry.stamps.len()
                }
                None => 0,
            };

            let admitted = retained < request.max_requests as usize;
            if admitted {
                let entry = inner.windows.entry(key.to_owned()).or_default();
                entry.stamps.push_back(now);
                entry.expires_at = Some(now + duration_to_millis(request.window));
            }

            let (count, oldest_millis) = match inner.windows.get(key) {
                Some(entry) => (entry.stamps.len(), entry.stamps.front().copied()),
                None => (0, None),
            };
            // Rejected calls never leave an empty window behind.
            if count == 0 {
                inner.windows.remove(key);
            }

            Ok(WindowOutcome {
                admitted,
                count: u32::try_from(count).unwrap_or(u32::MAX),
                oldest_millis,
            })
        })
    }

    fn health_check<'a>(&'a self) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(true) })
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

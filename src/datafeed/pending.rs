//! In-flight history request coalescing.
//!
//! One network call per key at a time. Callers arriving while it runs, or
//! within the grace window after it succeeded, share its result. A failed
//! call is dropped at once so the widget's next attempt goes to the network.
//! An entry nobody drove to completion (every caller cancelled) is dropped
//! once it has been in flight longer than the in-flight ceiling.

use crate::domain::bar::Bar;
use crate::error::DatafeedError;

use async_lock::Mutex;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest an unresolved entry is shared before a fresh call replaces it.
/// Well above the HTTP client's own request timeout.
pub const DEFAULT_IN_FLIGHT_CEILING: Duration = Duration::from_secs(60);

pub type FetchResult = Result<Vec<Bar>, Arc<DatafeedError>>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct PendingEntry {
    generation: u64,
    fetch: SharedFetch,
    started_at: Instant,
    resolved_at: Option<Instant>,
}

impl PendingEntry {
    fn is_expired(&self, now: Instant, grace: Duration, ceiling: Duration) -> bool {
        match self.resolved_at {
            Some(at) => now.saturating_duration_since(at) >= grace,
            None => now.saturating_duration_since(self.started_at) >= ceiling,
        }
    }
}

pub struct PendingRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
    next_generation: AtomicU64,
    grace: Duration,
    in_flight_ceiling: Duration,
}

impl PendingRequests {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            grace,
            in_flight_ceiling: DEFAULT_IN_FLIGHT_CEILING,
        }
    }

    pub fn with_in_flight_ceiling(mut self, ceiling: Duration) -> Self {
        self.in_flight_ceiling = ceiling;
        self
    }

    fn is_expired(&self, entry: &PendingEntry, now: Instant) -> bool {
        entry.is_expired(now, self.grace, self.in_flight_ceiling)
    }

    /// Join the in-flight call for `key`, or start one with `start`.
    ///
    /// `start` runs under the map lock; it must only build the future.
    pub async fn run<F>(&self, key: &str, start: F) -> FetchResult
    where
        F: FnOnce() -> BoxFuture<'static, Result<Vec<Bar>, DatafeedError>>,
    {
        let (generation, fetch) = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            entries.retain(|key, entry| {
                let expired = self.is_expired(entry, now);
                if expired && entry.resolved_at.is_none() {
                    tracing::debug!(key = %key, "dropping abandoned history request");
                }
                !expired
            });

            match entries.get(key) {
                Some(entry) => {
                    tracing::debug!(key = %key, "joining in-flight history request");
                    (entry.generation, entry.fetch.clone())
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = start().map(|r| r.map_err(Arc::new)).boxed().shared();
                    entries.insert(
                        key.to_string(),
                        PendingEntry {
                            generation,
                            fetch: fetch.clone(),
                            started_at: now,
                            resolved_at: None,
                        },
                    );
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut entries = self.entries.lock().await;
        let ours = entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation);
        if ours {
            if result.is_ok() {
                if let Some(entry) = entries.get_mut(key) {
                    entry.resolved_at.get_or_insert_with(Instant::now);
                }
            } else {
                entries.remove(key);
            }
        }
        result
    }

    /// Entries currently held, in flight or inside their grace window.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| !self.is_expired(entry, now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

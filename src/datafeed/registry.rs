//! Process-wide bookkeeping shared by every chart's datafeed.
//!
//! The host creates one registry and hands an `Arc` of it to each
//! [`Datafeed`](super::Datafeed); tests build their own.

use super::config::DatafeedConfig;
use super::pending::PendingRequests;
use crate::domain::bar::{Bar, LastBarCache};
use crate::shared::SubscriptionId;

use async_lock::Mutex;
use std::collections::HashMap;
use std::sync::{Mutex as SyncMutex, PoisonError};
use std::time::Duration;

/// A live stream opened through `subscribe_bars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub id: SubscriptionId,
    pub subscriber_uid: String,
    /// Asset identity the stream was opened for.
    pub asset: String,
    /// Canonical period.
    pub resolution: String,
}

pub struct DatafeedRegistry {
    pub(crate) pending: PendingRequests,
    pub(crate) subscriptions: Mutex<HashMap<String, ActiveSubscription>>,
    // Touched from stream callbacks, which are synchronous.
    last_bars: SyncMutex<LastBarCache>,
}

impl Default for DatafeedRegistry {
    fn default() -> Self {
        Self::new(&DatafeedConfig::default())
    }
}

impl DatafeedRegistry {
    pub fn new(config: &DatafeedConfig) -> Self {
        Self::with_limits(config.dedup_grace, config.last_bar_capacity)
    }

    pub fn with_limits(dedup_grace: Duration, last_bar_capacity: usize) -> Self {
        Self {
            pending: PendingRequests::new(dedup_grace),
            subscriptions: Mutex::new(HashMap::new()),
            last_bars: SyncMutex::new(LastBarCache::new(last_bar_capacity)),
        }
    }

    // ── Last-bar cache ───────────────────────────────────────────────────

    pub fn last_bar(&self, key: &str) -> Option<Bar> {
        self.cache().get(key)
    }

    /// Store unless the cached bar is newer.
    pub fn record_bar_if_newer(&self, key: &str, bar: Bar) -> bool {
        let stored = self.cache().update_if_newer(key, bar);
        if stored {
            tracing::debug!(key = %key, time = bar.time, "last bar updated");
        }
        stored
    }

    pub fn record_bar(&self, key: &str, bar: Bar) {
        self.cache().insert(key, bar);
    }

    pub fn last_bar_count(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, LastBarCache> {
        self.last_bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub async fn active_subscriptions(&self) -> Vec<ActiveSubscription> {
        self.subscriptions.lock().await.values().cloned().collect()
    }

    pub async fn active_subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn pending_request_count(&self) -> usize {
        self.pending.len().await
    }

    /// Forget everything. Live streams are not closed.
    pub async fn clear(&self) {
        self.pending.clear().await;
        self.subscriptions.lock().await.clear();
        self.cache().clear();
    }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn history_key(asset: &str, resolution: &str, from_ms: i64, to_ms: i64) -> String {
    format!("{asset}-{resolution}-{from_ms}-{to_ms}")
}

pub fn subscription_key(asset: &str, subscriber_uid: &str) -> String {
    format!("{asset}-{subscriber_uid}")
}

pub fn cache_key(asset: &str, resolution: &str) -> String {
    format!("{asset}-{resolution}")
}

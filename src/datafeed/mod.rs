//! Chart datafeed: the widget-facing adapter.
//!
//! One [`Datafeed`] per chart instance. The widget drives it in order:
//! `on_ready` → `resolve_symbol` → `get_bars` (pull) → `subscribe_bars`
//! (push) → `unsubscribe_bars`. The hosting application may retarget it at
//! any time with `update_base_asset`.
//!
//! Nothing here returns an error to the widget. Failed history windows come
//! back empty with `no_data`, failed stream calls are logged, malformed
//! candles are dropped.

pub mod backend;
pub mod capabilities;
pub mod config;
pub mod pending;
pub mod reconcile;
pub mod registry;

pub use backend::{CandleSink, HistoryRequest, MarketDataBackend, StreamParams};
pub use capabilities::{DatafeedConfiguration, LibrarySymbolInfo};
pub use config::{DatafeedConfig, DatafeedConfigBuilder, UnsubscribeKeying};
pub use reconcile::SeamReconciler;
pub use registry::{ActiveSubscription, DatafeedRegistry};

use crate::domain::asset::{BaseAsset, BaseAssetRef};
use crate::domain::bar::{self, Bar, BarCallback, CandleUpdate, HistoryMetadata};
use crate::shared::normalize_resolution;
use crate::shared::time::seconds_to_millis;
use registry::{cache_key, history_key, subscription_key};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// History window requested by the widget. `from`/`to` are epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodParams {
    pub from: i64,
    pub to: i64,
    #[serde(default)]
    pub count_back: Option<u32>,
    #[serde(default)]
    pub first_data_request: bool,
}

pub struct Datafeed {
    backend: Arc<dyn MarketDataBackend>,
    registry: Arc<DatafeedRegistry>,
    base_asset: BaseAssetRef,
    config: DatafeedConfig,
}

impl Datafeed {
    pub fn new(
        backend: Arc<dyn MarketDataBackend>,
        registry: Arc<DatafeedRegistry>,
        base_asset: BaseAssetRef,
        config: DatafeedConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            base_asset,
            config,
        }
    }

    /// A datafeed with its own registry and default config.
    pub fn standalone(backend: Arc<dyn MarketDataBackend>, asset: BaseAsset) -> Self {
        let config = DatafeedConfig::default();
        Self::new(
            backend,
            Arc::new(DatafeedRegistry::new(&config)),
            BaseAssetRef::new(asset),
            config,
        )
    }

    pub fn base_asset(&self) -> &BaseAssetRef {
        &self.base_asset
    }

    pub fn registry(&self) -> &Arc<DatafeedRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DatafeedConfig {
        &self.config
    }

    // ── Widget contract ──────────────────────────────────────────────────

    /// Capabilities, delivered after one zero-delay tick as the widget expects.
    pub async fn on_ready(&self) -> DatafeedConfiguration {
        futures_timer::Delay::new(Duration::ZERO).await;
        DatafeedConfiguration::new(&self.config.supported_resolutions)
    }

    /// Symbol metadata for the current asset, delivered after one tick.
    pub async fn resolve_symbol(&self, symbol_name: &str) -> LibrarySymbolInfo {
        futures_timer::Delay::new(Duration::ZERO).await;
        let asset = self.base_asset.get();
        LibrarySymbolInfo::for_asset(symbol_name, &asset, &self.config.supported_resolutions)
    }

    /// Bars for one history window, oldest first.
    pub async fn get_bars(&self, resolution: &str, params: PeriodParams) -> (Vec<Bar>, HistoryMetadata) {
        let asset = self.base_asset.get();
        let period = normalize_resolution(resolution);
        let from = seconds_to_millis(params.from);
        let to = seconds_to_millis(params.to);
        let key = history_key(asset.identity(), &period, from, to);

        let request = HistoryRequest {
            from,
            to,
            amount: params.count_back,
            usd: self.config.usd,
            period: period.clone(),
            blockchain: asset.chain_id.clone(),
            target: asset.target(),
        };
        let backend = Arc::clone(&self.backend);
        let result = self
            .registry
            .pending
            .run(&key, move || {
                async move { backend.fetch_ohlcv(request).await }.boxed()
            })
            .await;

        match result {
            Ok(mut bars) => {
                bars.sort_by_key(Bar::time_secs);
                if let Some(last) = bar::latest(&bars) {
                    self.registry
                        .record_bar_if_newer(&cache_key(asset.identity(), &period), *last);
                }
                let no_data = bars.is_empty();
                (bars, HistoryMetadata { no_data })
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "history fetch failed");
                (Vec::new(), HistoryMetadata { no_data: true })
            }
        }
    }

    /// Open a live stream for `subscriber_uid`, replacing any stream it already has.
    pub async fn subscribe_bars(&self, resolution: &str, on_realtime: BarCallback, subscriber_uid: &str) {
        let asset = self.base_asset.get();
        let period = normalize_resolution(resolution);
        let key = subscription_key(asset.identity(), subscriber_uid);

        let previous = self.registry.subscriptions.lock().await.remove(&key);
        if let Some(previous) = previous {
            tracing::debug!(key = %key, id = %previous.id, "replacing existing subscription");
            self.close_quietly(&previous).await;
        }

        let bar_key = cache_key(asset.identity(), &period);
        let seed = self.registry.last_bar(&bar_key);
        let sink = self.reconciling_sink(bar_key, seed, on_realtime);
        let params = StreamParams {
            period: period.clone(),
            chain_id: asset.chain_id.clone(),
            target: asset.target(),
        };

        let id = match self.backend.subscribe_ohlcv(params, sink).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "subscribe failed");
                return;
            }
        };

        tracing::debug!(key = %key, id = %id, "subscribed");
        let replaced = self.registry.subscriptions.lock().await.insert(
            key,
            ActiveSubscription {
                id,
                subscriber_uid: subscriber_uid.to_string(),
                asset: asset.identity().to_string(),
                resolution: period,
            },
        );
        // A concurrent subscribe for the same key finished first.
        if let Some(stale) = replaced {
            self.close_quietly(&stale).await;
        }
    }

    /// Close the stream for `subscriber_uid`. The entry is forgotten even if closing fails.
    pub async fn unsubscribe_bars(&self, subscriber_uid: &str) {
        let removed = {
            let mut subscriptions = self.registry.subscriptions.lock().await;
            match self.config.unsubscribe_keying {
                UnsubscribeKeying::CurrentAsset => {
                    let key = subscription_key(&self.base_asset.identity(), subscriber_uid);
                    subscriptions.remove(&key)
                }
                UnsubscribeKeying::SubscribedAsset => {
                    let key = subscriptions
                        .iter()
                        .find(|(_, sub)| sub.subscriber_uid == subscriber_uid)
                        .map(|(key, _)| key.clone());
                    key.and_then(|key| subscriptions.remove(&key))
                }
            }
        };

        match removed {
            Some(subscription) => self.close_quietly(&subscription).await,
            None => tracing::debug!(subscriber_uid, "no active subscription to close"),
        }
    }

    /// Point the chart at another asset without rebuilding the datafeed.
    pub fn update_base_asset(&self, asset: BaseAsset) {
        tracing::debug!(asset = %asset.identity(), is_pair = asset.is_pair, "base asset updated");
        self.base_asset.set(asset);
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn close_quietly(&self, subscription: &ActiveSubscription) {
        if let Err(e) = self.backend.unsubscribe_ohlcv(&subscription.id).await {
            tracing::warn!(id = %subscription.id, error = %e, "unsubscribe failed");
        }
    }

    fn reconciling_sink(&self, bar_key: String, seed: Option<Bar>, on_realtime: BarCallback) -> CandleSink {
        let registry = Arc::clone(&self.registry);
        let reconciler = Mutex::new(SeamReconciler::new(seed));

        Arc::new(move |candle: CandleUpdate| {
            let reconciled = reconciler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reconcile(candle);
            let Some(bar) = reconciled else {
                tracing::trace!(key = %bar_key, "dropping candle without time");
                return;
            };
            registry.record_bar(&bar_key, bar);
            on_realtime(bar);
        })
    }
}

//! # Mobula Datafeed
//!
//! Chart datafeed adapter for Mobula OHLCV history and live candle streams.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Resolutions, time units, assets, bars (always available)
//! 2. **Datafeed**: The widget contract: request dedup, last-bar cache, seam
//!    reconciliation, subscription bookkeeping over a [`MarketDataBackend`]
//! 3. **HTTP API**: `MobulaHttp` with a retry policy for history queries
//! 4. **Stream**: `tokio-tungstenite` OHLCV stream client
//! 5. **High-Level Client**: `MobulaClient`, the production backend
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mobula_datafeed::prelude::*;
//! use std::sync::Arc;
//!
//! let client = MobulaClient::builder().api_key("...").build()?;
//! let config = DatafeedConfig::default();
//! let registry = Arc::new(DatafeedRegistry::new(&config));
//!
//! let feed = client.datafeed(registry, BaseAsset::pool("0xpool", "evm:1", "PEPE"), config);
//! let (bars, meta) = feed.get_bars("60", PeriodParams { from, to, ..Default::default() }).await;
//! feed.subscribe_bars("60", Arc::new(|bar| println!("{bar:?}")), "chart-1").await;
//! ```
//!
//! [`MarketDataBackend`]: datafeed::MarketDataBackend

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes, resolutions, time helpers.
pub mod shared;

/// Domain modules (vertical slices): types, wire types, state.
pub mod domain;

/// Unified error types.
pub mod error;

/// Network URL constants.
pub mod network;

// ── Layer 2: Datafeed ────────────────────────────────────────────────────────

/// The chart datafeed and its backend seam.
pub mod datafeed;

// ── Layer 3: HTTP API ────────────────────────────────────────────────────────

/// HTTP client with retry policies.
#[cfg(feature = "http")]
pub mod http;

// ── Layer 4: Stream ──────────────────────────────────────────────────────────

/// OHLCV stream: messages, subscriptions, events.
pub mod ws;

// ── Layer 5: High-Level Client ───────────────────────────────────────────────

/// `MobulaClient`: the production backend.
#[cfg(all(feature = "http", feature = "ws-native"))]
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared
    pub use crate::shared::{normalize_resolution, Resolution, SubscriptionId};

    // Domain types
    pub use crate::domain::asset::{AssetTarget, BaseAsset, BaseAssetRef};
    pub use crate::domain::bar::{Bar, BarCallback, CandleUpdate, HistoryMetadata, LastBarCache};

    // Datafeed
    pub use crate::datafeed::{
        ActiveSubscription, CandleSink, Datafeed, DatafeedConfig, DatafeedConfigBuilder,
        DatafeedConfiguration, DatafeedRegistry, HistoryRequest, LibrarySymbolInfo,
        MarketDataBackend, PeriodParams, StreamParams, UnsubscribeKeying,
    };

    // Errors
    pub use crate::error::{DatafeedError, HttpError, WsError};

    // Network
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_WS_URL};

    // HTTP client
    #[cfg(feature = "http")]
    pub use crate::http::{MobulaHttp, RetryConfig, RetryPolicy};

    // Stream types
    pub use crate::ws::{MessageIn, MessageOut, ReadyState, WsConfig, WsEvent};
    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::StreamClient;

    // High-level client
    #[cfg(all(feature = "http", feature = "ws-native"))]
    pub use crate::client::{MobulaClient, MobulaClientBuilder};
}

//! Backend seam: where the adapter reaches the network.

use crate::domain::asset::AssetTarget;
use crate::domain::bar::{Bar, CandleUpdate};
use crate::error::DatafeedError;
use crate::shared::SubscriptionId;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Historical OHLCV query. Window bounds are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRequest {
    pub from: i64,
    pub to: i64,
    /// Max bar count hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    /// Quote in USD rather than the pool's native quote currency.
    pub usd: bool,
    pub period: String,
    pub blockchain: String,
    #[serde(flatten)]
    pub target: AssetTarget,
}

/// Live OHLCV stream parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    pub period: String,
    pub chain_id: String,
    #[serde(flatten)]
    pub target: AssetTarget,
}

/// Receives every candle pushed for one subscription, in transport order.
pub type CandleSink = Arc<dyn Fn(CandleUpdate) + Send + Sync>;

/// History and stream provider behind a [`Datafeed`](super::Datafeed).
///
/// Implementations must not retry on their own behalf beyond their transport
/// policy; the chart widget owns retry of failed history windows.
#[async_trait]
pub trait MarketDataBackend: Send + Sync {
    async fn fetch_ohlcv(&self, request: HistoryRequest) -> Result<Vec<Bar>, DatafeedError>;

    async fn subscribe_ohlcv(
        &self,
        params: StreamParams,
        sink: CandleSink,
    ) -> Result<SubscriptionId, DatafeedError>;

    async fn unsubscribe_ohlcv(&self, id: &SubscriptionId) -> Result<(), DatafeedError>;
}

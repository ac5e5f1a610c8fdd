//! High-level client: `MobulaClient`, the production [`MarketDataBackend`].
//!
//! Bundles the history client and the stream client behind one builder, and
//! hands out datafeeds wired to it.

use crate::datafeed::{
    CandleSink, Datafeed, DatafeedConfig, DatafeedRegistry, HistoryRequest, MarketDataBackend,
    StreamParams,
};
use crate::domain::asset::{BaseAsset, BaseAssetRef};
use crate::domain::bar::Bar;
use crate::error::DatafeedError;
use crate::http::{MobulaHttp, RetryPolicy};
use crate::shared::SubscriptionId;
use crate::ws::native::StreamClient;
use crate::ws::WsConfig;

use async_trait::async_trait;
use std::sync::Arc;

/// Mobula history + stream backend.
///
/// Cheap to clone; clones share the HTTP pool and the stream connection.
#[derive(Clone)]
pub struct MobulaClient {
    pub(crate) http: MobulaHttp,
    pub(crate) stream: Arc<StreamClient>,
}

impl MobulaClient {
    pub fn builder() -> MobulaClientBuilder {
        MobulaClientBuilder::default()
    }

    pub fn http(&self) -> &MobulaHttp {
        &self.http
    }

    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    /// A datafeed for one chart, backed by this client.
    ///
    /// Datafeeds that share `registry` share in-flight history requests and
    /// last-bar seeds.
    pub fn datafeed(&self, registry: Arc<DatafeedRegistry>, asset: BaseAsset, config: DatafeedConfig) -> Datafeed {
        Datafeed::new(
            Arc::new(self.clone()),
            registry,
            BaseAssetRef::new(asset),
            config,
        )
    }

    /// Close the stream connection and every open stream.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stream.disconnect().await {
            tracing::warn!(error = %e, "stream disconnect failed");
        }
    }
}

#[async_trait]
impl MarketDataBackend for MobulaClient {
    async fn fetch_ohlcv(&self, request: HistoryRequest) -> Result<Vec<Bar>, DatafeedError> {
        Ok(self.http.get_ohlcv_history(&request).await?)
    }

    async fn subscribe_ohlcv(&self, params: StreamParams, sink: CandleSink) -> Result<SubscriptionId, DatafeedError> {
        Ok(self.stream.subscribe(params, sink).await?)
    }

    async fn unsubscribe_ohlcv(&self, id: &SubscriptionId) -> Result<(), DatafeedError> {
        Ok(self.stream.unsubscribe(id).await?)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct MobulaClientBuilder {
    base_url: String,
    ws_url: String,
    api_key: Option<String>,
    history_retry: RetryPolicy,
    reconnect: bool,
}

impl Default for MobulaClientBuilder {
    fn default() -> Self {
        Self {
            base_url: crate::network::DEFAULT_API_URL.to_string(),
            ws_url: crate::network::DEFAULT_WS_URL.to_string(),
            api_key: None,
            history_retry: RetryPolicy::None,
            reconnect: true,
        }
    }
}

impl MobulaClientBuilder {
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = url.to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn history_retry(mut self, policy: RetryPolicy) -> Self {
        self.history_retry = policy;
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> Result<MobulaClient, DatafeedError> {
        let http = MobulaHttp::new(&self.base_url)?
            .with_api_key(self.api_key.clone())
            .with_history_retry(self.history_retry);
        let stream = StreamClient::new(WsConfig {
            url: self.ws_url,
            api_key: self.api_key,
            reconnect: self.reconnect,
            ..WsConfig::default()
        });

        Ok(MobulaClient {
            http,
            stream: Arc::new(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafeed::PeriodParams;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP server that fails every request with a 503.
    async fn unavailable_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let client = MobulaClient::builder().build().unwrap();
        assert_eq!(client.http().base_url(), crate::network::DEFAULT_API_URL);
        assert_eq!(client.stream().config().url, crate::network::DEFAULT_WS_URL);
        assert!(client.stream().config().api_key.is_none());
        assert!(!client.http().has_api_key().await);
    }

    #[tokio::test]
    async fn test_builder_api_key_reaches_both_transports() {
        let client = MobulaClient::builder()
            .base_url("http://localhost:8080/")
            .ws_url("ws://localhost:8081")
            .api_key("secret")
            .reconnect(false)
            .build()
            .unwrap();
        assert_eq!(client.http().base_url(), "http://localhost:8080");
        assert_eq!(client.stream().config().api_key.as_deref(), Some("secret"));
        assert!(!client.stream().config().reconnect);
        assert!(client.http().has_api_key().await);
    }

    #[tokio::test]
    async fn test_failed_history_reaches_the_widget_after_one_request() {
        let (base_url, hits) = unavailable_server().await;
        let client = MobulaClient::builder()
            .base_url(&base_url)
            .reconnect(false)
            .build()
            .unwrap();
        let config = DatafeedConfig::default();
        let registry = Arc::new(DatafeedRegistry::new(&config));
        let feed = client.datafeed(
            Arc::clone(&registry),
            BaseAsset::pool("0xpool", "evm:1", "PEPE"),
            config,
        );

        let (bars, meta) = feed
            .get_bars(
                "1",
                PeriodParams {
                    from: 1_700_000_000,
                    to: 1_700_003_600,
                    count_back: None,
                    first_data_request: true,
                },
            )
            .await;

        assert!(bars.is_empty());
        assert!(meta.no_data);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_surfaces_ws_error() {
        let client = MobulaClient::builder().build().unwrap();
        let err = client
            .unsubscribe_ohlcv(&SubscriptionId::new("sub-missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatafeedError::Ws(_)));
    }
}

//! Low-level HTTP client: `MobulaHttp`.
//!
//! One method per API endpoint. Returns domain bars; the datafeed layer adds
//! dedup and caching on top.

use crate::datafeed::HistoryRequest;
use crate::domain::bar::wire::OhlcvHistoryResponse;
use crate::domain::bar::Bar;
use crate::error::HttpError;
use crate::http::retry::RetryPolicy;

use async_lock::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const HISTORY_PATH: &str = "/api/1/market/history/pair";

/// Low-level HTTP client for the Mobula REST API.
#[derive(Clone)]
pub struct MobulaHttp {
    base_url: String,
    client: Client,
    /// Sent verbatim as `Authorization`. Never exposed publicly.
    api_key: Arc<RwLock<Option<String>>>,
    history_retry: RetryPolicy,
}

impl MobulaHttp {
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            api_key: Arc::new(RwLock::new(None)),
            history_retry: RetryPolicy::None,
        })
    }

    /// Single attempt unless set; the chart widget owns retries.
    pub fn with_history_retry(mut self, policy: RetryPolicy) -> Self {
        self.history_retry = policy;
        self
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = Arc::new(RwLock::new(key));
        self
    }

    pub async fn set_api_key(&self, key: Option<String>) {
        *self.api_key.write().await = key;
    }

    pub async fn has_api_key(&self) -> bool {
        self.api_key.read().await.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── OHLCV history ────────────────────────────────────────────────────

    pub async fn get_ohlcv_history(&self, request: &HistoryRequest) -> Result<Vec<Bar>, HttpError> {
        let url = history_url(&self.base_url, request);
        let response: OhlcvHistoryResponse = self.get(&url, &self.history_retry).await?;
        Ok(response.data.into_iter().map(Bar::from).collect())
    }

    // ── Internal HTTP methods ────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: &str, retry: &RetryPolicy) -> Result<T, HttpError> {
        let Some(config) = retry.config() else {
            return self.do_get(url).await;
        };

        let mut attempt = 0;
        loop {
            let err = match self.do_get::<T>(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            if !config.should_retry(&err) {
                return Err(err);
            }
            if attempt >= config.max_retries {
                return Err(HttpError::MaxRetriesExceeded {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }

            let delay = config.delay_for(attempt, &err);
            tracing::debug!(
                attempt = attempt + 1,
                max = config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying request to {}",
                url
            );
            futures_timer::Delay::new(delay).await;
            attempt += 1;
        }
    }

    async fn do_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let mut req = self.client.get(url);
        if let Some(key) = self.api_key.read().await.as_ref() {
            req = req.header("Authorization", key.as_str());
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let retry_after_ms = retry_after_ms(resp.headers().get("retry-after").and_then(|v| v.to_str().ok()));
        let status_code = status.as_u16();
        let body_text = resp.text().await.unwrap_or_default();

        Err(classify_status(status_code, body_text, retry_after_ms))
    }
}

/// `retry-after` in delta-seconds, as milliseconds. HTTP-dates are ignored.
fn retry_after_ms(header: Option<&str>) -> Option<u64> {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

fn classify_status(status: u16, body: String, retry_after_ms: Option<u64>) -> HttpError {
    match status {
        401 | 403 => HttpError::Unauthorized,
        404 => HttpError::NotFound(body),
        408 => HttpError::Timeout,
        429 => HttpError::RateLimited { retry_after_ms },
        400..=499 => HttpError::BadRequest(body),
        _ => HttpError::ServerError { status, body },
    }
}

fn history_url(base_url: &str, request: &HistoryRequest) -> String {
    let (id_name, id_value) = request.target.identity_param();
    let mut url = format!(
        "{}{}?blockchain={}&from={}&to={}&period={}&usd={}&mode={}&{}={}",
        base_url,
        HISTORY_PATH,
        urlencoding::encode(&request.blockchain),
        request.from,
        request.to,
        urlencoding::encode(&request.period),
        request.usd,
        request.target.mode(),
        id_name,
        urlencoding::encode(id_value),
    );
    if let Some(amount) = request.amount {
        url = format!("{}&amount={}", url, amount);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::AssetTarget;
    use crate::http::retry::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP server answering every request with `response`.
    /// Returns its base URL and a request counter.
    async fn canned_server(response: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn pool_request() -> HistoryRequest {
        request(
            AssetTarget::Pool {
                address: "0xpool".into(),
            },
            None,
        )
    }

    fn request(target: AssetTarget, amount: Option<u32>) -> HistoryRequest {
        HistoryRequest {
            from: 1_700_000_000_000,
            to: 1_700_003_600_000,
            amount,
            usd: true,
            period: "1m".into(),
            blockchain: "evm:1".into(),
            target,
        }
    }

    #[test]
    fn test_history_url_pool_mode() {
        let url = history_url(
            "https://api.mobula.io",
            &request(
                AssetTarget::Pool {
                    address: "0xpool".into(),
                },
                Some(500),
            ),
        );
        assert_eq!(
            url,
            "https://api.mobula.io/api/1/market/history/pair?blockchain=evm%3A1\
             &from=1700000000000&to=1700003600000&period=1m&usd=true&mode=pool\
             &address=0xpool&amount=500"
        );
    }

    #[test]
    fn test_history_url_asset_mode_without_amount() {
        let url = history_url(
            "https://api.mobula.io",
            &request(
                AssetTarget::Asset {
                    asset: "So11111111111111111111111111111111111111112".into(),
                },
                None,
            ),
        );
        assert!(url.contains("mode=asset&asset=So11111111111111111111111111111111111111112"));
        assert!(!url.contains("amount="));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, String::new(), None), HttpError::Unauthorized));
        assert!(matches!(
            classify_status(429, String::new(), Some(2000)),
            HttpError::RateLimited {
                retry_after_ms: Some(2000)
            }
        ));
        assert!(matches!(classify_status(422, "x".into(), None), HttpError::BadRequest(_)));
        assert!(matches!(
            classify_status(503, String::new(), None),
            HttpError::ServerError { status: 503, .. }
        ));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let http = MobulaHttp::new("https://api.mobula.io/").unwrap();
        assert_eq!(http.base_url(), "https://api.mobula.io");
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(retry_after_ms(Some("2")), Some(2000));
        assert_eq!(retry_after_ms(Some(" 7 ")), Some(7000));
        assert_eq!(retry_after_ms(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(retry_after_ms(None), None);
    }

    #[test]
    fn test_retry_after_saturates_on_huge_values() {
        assert_eq!(retry_after_ms(Some("18446744073709551615")), Some(u64::MAX));
        assert_eq!(retry_after_ms(Some("18446744073709552")), Some(u64::MAX));
    }

    #[tokio::test]
    async fn test_huge_retry_after_surfaces_rate_limited() {
        let (base_url, hits) = canned_server(
            "HTTP/1.1 429 Too Many Requests\r\nretry-after: 18446744073709551615\r\n\
             content-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let http = MobulaHttp::new(&base_url).unwrap();

        let err = http.get_ohlcv_history(&pool_request()).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::RateLimited {
                retry_after_ms: Some(u64::MAX)
            }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_failure_is_a_single_request_by_default() {
        let (base_url, hits) = canned_server(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let http = MobulaHttp::new(&base_url).unwrap();

        let err = http.get_ohlcv_history(&pool_request()).await.unwrap_err();
        assert!(matches!(err, HttpError::ServerError { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idempotent_retry_is_opt_in() {
        let (base_url, hits) = canned_server(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let http = MobulaHttp::new(&base_url)
            .unwrap()
            .with_history_retry(RetryPolicy::Custom(RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_factor: 2.0,
                jitter: false,
                retryable_statuses: vec![503],
            }));

        let err = http.get_ohlcv_history(&pool_request()).await.unwrap_err();
        assert!(matches!(err, HttpError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_api_key_roundtrip() {
        let http = MobulaHttp::new("https://api.mobula.io").unwrap();
        assert!(!http.has_api_key().await);
        http.set_api_key(Some("key".into())).await;
        assert!(http.has_api_key().await);
    }
}

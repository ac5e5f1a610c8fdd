//! OHLCV stream layer: messages, subscription tracking, events.
//!
//! The transport lives in `native.rs` (`ws-native` feature, tokio-tungstenite).
//! This module defines the wire messages and client configuration.

pub mod subscriptions;

#[cfg(feature = "ws-native")]
pub mod native;

use crate::datafeed::StreamParams;
use crate::domain::bar::CandleUpdate;
use crate::shared::SubscriptionId;
use serde::{Deserialize, Serialize};

pub use subscriptions::{SinkRegistry, SubscriptionBook};

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageOut {
    Ohlcv {
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        payload: OhlcvPayload,
    },
    Unsubscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        payload: UnsubscribePayload,
    },
    Ping,
}

impl MessageOut {
    pub fn ohlcv(authorization: Option<String>, subscription_id: SubscriptionId, params: StreamParams) -> Self {
        Self::Ohlcv {
            authorization,
            payload: OhlcvPayload {
                subscription_id,
                params,
            },
        }
    }

    pub fn unsubscribe(authorization: Option<String>, subscription_id: SubscriptionId) -> Self {
        Self::Unsubscribe {
            authorization,
            payload: UnsubscribePayload { subscription_id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OhlcvPayload {
    pub subscription_id: SubscriptionId,
    #[serde(flatten)]
    pub params: StreamParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribePayload {
    pub subscription_id: SubscriptionId,
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Raw inbound message from the server.
///
/// Variant order matters: an error may also carry a `subscriptionId`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageIn {
    Error(ErrorMessage),
    Candle(CandleMessage),
    Event(EventMessage),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default)]
    pub subscription_id: Option<SubscriptionId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleMessage {
    pub subscription_id: SubscriptionId,
    #[serde(flatten)]
    pub candle: CandleUpdate,
}

/// Control frames such as `{"event":"pong"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
}

impl EventMessage {
    pub fn is_pong(&self) -> bool {
        self.event.eq_ignore_ascii_case("pong")
    }
}

// ─── WsEvent ─────────────────────────────────────────────────────────────────

/// Connection lifecycle events emitted to the consumer.
///
/// Candles do not go through here; they go to the sink registered per
/// subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    Connected,
    /// Connection lost (may trigger reconnect).
    Disconnected { code: Option<u16>, reason: String },
    /// Server error or undecodable frame.
    Error(String),
    MaxReconnectReached,
}

/// Connection state, mirrored in an atomic for lock-free reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u16> for ReadyState {
    fn from(v: u16) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Sent as `authorization` on every subscribe/unsubscribe.
    pub api_key: Option<String>,
    pub reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u32,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: crate::network::DEFAULT_WS_URL.to_string(),
            api_key: None,
            reconnect: true,
            max_reconnect_attempts: 10,
            base_reconnect_delay_ms: 1000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
        }
    }
}

//! Wire types for OHLCV history (REST) and pushed candles (WS).

use super::Bar;
use crate::shared::serde_util::epoch_number;
use serde::{Deserialize, Serialize};

/// `GET /api/1/market/history/pair` response.
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcvHistoryResponse {
    #[serde(default)]
    pub data: Vec<WireBar>,
}

/// One history row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireBar {
    #[serde(with = "epoch_number")]
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl From<WireBar> for Bar {
    fn from(w: WireBar) -> Self {
        Self {
            time: w.time,
            open: w.open,
            high: w.high,
            low: w.low,
            close: w.close,
            volume: w.volume,
        }
    }
}

/// A pushed candle. Every field is optional; the stream is not trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    #[serde(default, deserialize_with = "epoch_number::option::deserialize")]
    pub time: Option<i64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl CandleUpdate {
    /// Candle time, unless missing or zero.
    pub fn valid_time(&self) -> Option<i64> {
        self.time.filter(|t| *t != 0)
    }

    /// Fill gaps from the other prices. `None` when the candle has no usable time.
    pub fn into_bar(self) -> Option<Bar> {
        let time = self.valid_time()?;
        let open = self.open.or(self.close).unwrap_or(0.0);
        let close = self.close.unwrap_or(open);
        Some(Bar {
            time,
            open,
            high: self.high.unwrap_or(open.max(close)),
            low: self.low.unwrap_or(open.min(close)),
            close,
            volume: self.volume.unwrap_or(0.0),
        })
    }
}

impl From<Bar> for CandleUpdate {
    fn from(b: Bar) -> Self {
        Self {
            time: Some(b.time),
            open: Some(b.open),
            high: Some(b.high),
            low: Some(b.low),
            close: Some(b.close),
            volume: Some(b.volume),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_response_parses() {
        let resp: OhlcvHistoryResponse = serde_json::from_str(
            r#"{"data":[{"time":1700000000000,"open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":10}]}"#,
        )
        .unwrap();
        let bar: Bar = resp.data[0].clone().into();
        assert_eq!(bar.time, 1_700_000_000_000);
        assert_eq!(bar.high, 2.0);
        assert_eq!(bar.volume, 10.0);
    }

    #[test]
    fn test_history_response_missing_data_is_empty() {
        let resp: OhlcvHistoryResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.data.is_empty());
    }

    #[test]
    fn test_candle_without_time_is_rejected() {
        let c: CandleUpdate = serde_json::from_str(r#"{"open":1.0,"close":2.0}"#).unwrap();
        assert!(c.into_bar().is_none());
        let zero: CandleUpdate = serde_json::from_str(r#"{"time":0,"open":1.0}"#).unwrap();
        assert!(zero.into_bar().is_none());
    }

    #[test]
    fn test_candle_fills_missing_prices() {
        let c = CandleUpdate {
            time: Some(60),
            open: Some(2.0),
            close: Some(3.0),
            ..Default::default()
        };
        let bar = c.into_bar().unwrap();
        assert_eq!(bar.high, 3.0);
        assert_eq!(bar.low, 2.0);
        assert_eq!(bar.volume, 0.0);
    }
}

//! Bar domain - OHLCV samples handed to the chart.

pub mod state;
pub mod wire;

use crate::shared::time::to_seconds;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use state::LastBarCache;
pub use wire::CandleUpdate;

/// One OHLCV sample, in the widget's field names.
///
/// `time` keeps the unit it arrived in; compare through [`Bar::time_secs`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn time_secs(&self) -> i64 {
        to_seconds(self.time)
    }
}

/// Second half of the widget's history callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetadata {
    pub no_data: bool,
}

/// Realtime bar callback handed over by the widget.
pub type BarCallback = Arc<dyn Fn(Bar) + Send + Sync>;

/// Newest bar by time, if any.
pub fn latest(bars: &[Bar]) -> Option<&Bar> {
    bars.iter().max_by_key(|b| b.time_secs())
}

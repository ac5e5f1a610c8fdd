//! Seam reconciliation between historical and live bars.
//!
//! Price moves between the last history fetch and the moment a stream starts.
//! Left alone, the first live candle opens away from the last drawn close and
//! the chart shows a vertical jump. The first candle of each subscription is
//! re-opened at the cached close; every later candle passes through.

use crate::domain::bar::{Bar, CandleUpdate};
use crate::shared::time::to_seconds;

#[derive(Debug, Clone, Default)]
pub struct SeamReconciler {
    seed: Option<Bar>,
    first_candle_handled: bool,
}

impl SeamReconciler {
    /// `seed` is the last bar the chart already has for this asset/resolution.
    pub fn new(seed: Option<Bar>) -> Self {
        Self {
            seed,
            first_candle_handled: false,
        }
    }

    pub fn first_candle_handled(&self) -> bool {
        self.first_candle_handled
    }

    /// Bar to deliver for `candle`, or `None` if it is malformed and must be dropped.
    pub fn reconcile(&mut self, candle: CandleUpdate) -> Option<Bar> {
        let time = candle.valid_time()?;
        if self.first_candle_handled {
            return candle.into_bar();
        }
        self.first_candle_handled = true;

        let seed = match self.seed.take() {
            Some(seed) if to_seconds(time) > seed.time_secs() => seed,
            _ => return candle.into_bar(),
        };

        let open = [Some(seed.close), Some(seed.open), candle.open, candle.close]
            .into_iter()
            .flatten()
            .find(|price| price.is_finite())
            .unwrap_or(0.0);

        let mut bar = candle.into_bar()?;
        tracing::debug!(
            time = bar.time,
            live_open = bar.open,
            seam_open = open,
            "reconciled first live candle"
        );
        bar.open = open;
        bar.high = bar.high.max(open);
        bar.low = bar.low.min(open);
        Some(bar)
    }
}

//! Datafeed configuration and its builder.

use crate::domain::bar::state::DEFAULT_LAST_BAR_CAPACITY;
use crate::error::DatafeedError;
use crate::shared::Resolution;
use std::time::Duration;

/// How long a resolved history request stays reusable by identical calls.
pub const DEFAULT_DEDUP_GRACE: Duration = Duration::from_millis(200);

/// Which key `unsubscribe_bars` looks up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnsubscribeKeying {
    /// Key from the asset current at unsubscribe time. A retarget between
    /// subscribe and unsubscribe leaves the original stream open.
    #[default]
    CurrentAsset,
    /// Find the entry by subscriber uid, whatever asset it was opened for.
    SubscribedAsset,
}

#[derive(Debug, Clone)]
pub struct DatafeedConfig {
    pub dedup_grace: Duration,
    pub last_bar_capacity: usize,
    pub usd: bool,
    pub unsubscribe_keying: UnsubscribeKeying,
    pub supported_resolutions: Vec<Resolution>,
}

impl Default for DatafeedConfig {
    fn default() -> Self {
        Self {
            dedup_grace: DEFAULT_DEDUP_GRACE,
            last_bar_capacity: DEFAULT_LAST_BAR_CAPACITY,
            usd: true,
            unsubscribe_keying: UnsubscribeKeying::default(),
            supported_resolutions: Resolution::ALL.to_vec(),
        }
    }
}

impl DatafeedConfig {
    pub fn builder() -> DatafeedConfigBuilder {
        DatafeedConfigBuilder::default()
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct DatafeedConfigBuilder {
    config: DatafeedConfig,
}

impl DatafeedConfigBuilder {
    pub fn dedup_grace(mut self, grace: Duration) -> Self {
        self.config.dedup_grace = grace;
        self
    }

    pub fn last_bar_capacity(mut self, capacity: usize) -> Self {
        self.config.last_bar_capacity = capacity;
        self
    }

    /// Quote prices in USD (`true`) or in the pool's native quote currency.
    pub fn usd(mut self, usd: bool) -> Self {
        self.config.usd = usd;
        self
    }

    pub fn unsubscribe_keying(mut self, keying: UnsubscribeKeying) -> Self {
        self.config.unsubscribe_keying = keying;
        self
    }

    pub fn supported_resolutions(mut self, resolutions: Vec<Resolution>) -> Self {
        self.config.supported_resolutions = resolutions;
        self
    }

    pub fn build(self) -> Result<DatafeedConfig, DatafeedError> {
        if self.config.supported_resolutions.is_empty() {
            return Err(DatafeedError::Validation(
                "at least one resolution must be supported".into(),
            ));
        }
        if self.config.last_bar_capacity == 0 {
            return Err(DatafeedError::Validation(
                "last_bar_capacity must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}

//! Shared newtypes and utilities used across all modules.
//!
//! These types are serialization-transparent: they serialize/deserialize identically
//! to the raw format the backend sends, so they can be used directly in wire types
//! without conversion overhead.

pub mod serde_util;
pub mod time;

use crate::error::DatafeedError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// ─── SubscriptionId ──────────────────────────────────────────────────────────

/// Opaque identifier of a live OHLCV stream subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// A fresh client-side id (`sub-` + 16 hex chars).
    pub fn random() -> Self {
        Self(format!("sub-{:016x}", rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Serialize for SubscriptionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SubscriptionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SubscriptionId(s))
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Canonical candle period.
///
/// The canonical spelling (`as_str`) is what the backend expects as `period`.
/// The widget spelling (`to_widget`) is what the charting library sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1s")]
    Second1,
    #[serde(rename = "5s")]
    Second5,
    #[serde(rename = "15s")]
    Second15,
    #[serde(rename = "30s")]
    Second30,
    #[default]
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
    #[serde(rename = "1M")]
    Month1,
}

impl Resolution {
    /// Every supported resolution, shortest first.
    pub const ALL: [Resolution; 12] = [
        Self::Second1,
        Self::Second5,
        Self::Second15,
        Self::Second30,
        Self::Minute1,
        Self::Minute5,
        Self::Minute15,
        Self::Hour1,
        Self::Hour4,
        Self::Day1,
        Self::Week1,
        Self::Month1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second1 => "1s",
            Self::Second5 => "5s",
            Self::Second15 => "15s",
            Self::Second30 => "30s",
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
            Self::Week1 => "1w",
            Self::Month1 => "1M",
        }
    }

    /// Spelling used by the charting widget.
    pub fn to_widget(&self) -> &'static str {
        match self {
            Self::Second1 => "1S",
            Self::Second5 => "5S",
            Self::Second15 => "15S",
            Self::Second30 => "30S",
            Self::Minute1 => "1",
            Self::Minute5 => "5",
            Self::Minute15 => "15",
            Self::Hour1 => "60",
            Self::Hour4 => "240",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
            Self::Month1 => "1M",
        }
    }

    /// Duration of one candle in seconds. A month counts as 30 days.
    pub fn seconds(&self) -> u64 {
        match self {
            Self::Second1 => 1,
            Self::Second5 => 5,
            Self::Second15 => 15,
            Self::Second30 => 30,
            Self::Minute1 => 60,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Hour1 => 3600,
            Self::Hour4 => 14_400,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
            Self::Month1 => 2_592_000,
        }
    }

    pub fn is_seconds(&self) -> bool {
        self.seconds() < 60
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DatafeedError;

    /// Accepts widget spellings (`"1S"`, `"60"`, `"1D"`) and human ones
    /// (`"1s"`, `"1h"`, `"1d"`). Case matters only for minute vs month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let resolution = match s.trim() {
            "1S" | "1s" => Self::Second1,
            "5S" | "5s" => Self::Second5,
            "15S" | "15s" => Self::Second15,
            "30S" | "30s" => Self::Second30,
            "1" | "1m" | "1min" => Self::Minute1,
            "5" | "5m" | "5min" => Self::Minute5,
            "15" | "15m" | "15min" => Self::Minute15,
            "60" | "60m" | "1h" | "1H" => Self::Hour1,
            "240" | "4h" | "4H" => Self::Hour4,
            "1D" | "D" | "1d" | "24h" | "1440" => Self::Day1,
            "1W" | "W" | "1w" | "7d" | "7D" => Self::Week1,
            "1M" | "M" | "1mo" => Self::Month1,
            other => {
                return Err(DatafeedError::Validation(format!(
                    "unsupported resolution: {other}"
                )))
            }
        };
        Ok(resolution)
    }
}

/// Map any accepted resolution spelling to its canonical period string.
///
/// Unknown input comes back unchanged; callers forward it to the backend as-is.
pub fn normalize_resolution(resolution: &str) -> String {
    match resolution.parse::<Resolution>() {
        Ok(r) => r.as_str().to_string(),
        Err(_) => resolution.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_idempotent_for_canonical_values() {
        for r in Resolution::ALL {
            assert_eq!(normalize_resolution(r.as_str()), r.as_str());
        }
    }

    #[test]
    fn test_normalize_widget_spellings() {
        assert_eq!(normalize_resolution("1S"), "1s");
        assert_eq!(normalize_resolution("1"), "1m");
        assert_eq!(normalize_resolution("60"), "1h");
        assert_eq!(normalize_resolution("240"), "4h");
        assert_eq!(normalize_resolution("1D"), "1d");
        assert_eq!(normalize_resolution("1W"), "1w");
        assert_eq!(normalize_resolution("1M"), "1M");
    }

    #[test]
    fn test_normalize_minute_and_month_differ_by_case() {
        assert_eq!(normalize_resolution("1m"), "1m");
        assert_eq!(normalize_resolution("M"), "1M");
    }

    #[test]
    fn test_normalize_unknown_passes_through() {
        assert_eq!(normalize_resolution("3m"), "3m");
        assert_eq!(normalize_resolution(""), "");
    }

    #[test]
    fn test_widget_spelling_round_trips() {
        for r in Resolution::ALL {
            assert_eq!(r.to_widget().parse::<Resolution>().unwrap(), r);
        }
    }

    #[test]
    fn test_resolution_serde() {
        let r: Resolution = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(r, Resolution::Hour4);
        assert_eq!(r.seconds(), 14_400);
        assert_eq!(serde_json::to_string(&Resolution::Month1).unwrap(), "\"1M\"");
    }

    #[test]
    fn test_subscription_id_serde() {
        let id = SubscriptionId::from("sub-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sub-1\"");
        let back: SubscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_random_subscription_ids_differ() {
        let a = SubscriptionId::random();
        let b = SubscriptionId::random();
        assert!(a.as_str().starts_with("sub-"));
        assert_ne!(a, b);
    }
}

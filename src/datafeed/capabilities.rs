//! What the datafeed tells the chart widget about itself and a symbol.
//!
//! Field names are the widget's, not ours; do not rename.

use crate::domain::asset::BaseAsset;
use crate::shared::Resolution;
use serde::{Deserialize, Serialize};

/// Upper bound on `pricescale` (16 decimals).
pub const MAX_PRICESCALE: u64 = 10_000_000_000_000_000;

/// `pricescale` used when the asset has no usable price.
pub const DEFAULT_PRICESCALE: u64 = 100_000_000;

const EXCHANGE: &str = "Mobula";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub value: String,
    pub name: String,
    pub desc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolType {
    pub name: String,
    pub value: String,
}

/// Delivered by `on_ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub supports_search: bool,
    pub supports_group_request: bool,
    pub supports_marks: bool,
    pub supports_timescale_marks: bool,
    pub supports_time: bool,
    pub exchanges: Vec<Exchange>,
    pub symbols_types: Vec<SymbolType>,
}

impl DatafeedConfiguration {
    pub fn new(resolutions: &[Resolution]) -> Self {
        Self {
            supported_resolutions: widget_resolutions(resolutions),
            supports_search: false,
            supports_group_request: false,
            supports_marks: false,
            supports_timescale_marks: false,
            supports_time: true,
            exchanges: Vec::new(),
            symbols_types: Vec::new(),
        }
    }
}

/// Delivered by `resolve_symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibrarySymbolInfo {
    pub name: String,
    pub ticker: String,
    pub description: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub listed_exchange: String,
    pub format: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_intraday: bool,
    pub has_seconds: bool,
    pub seconds_multipliers: Vec<String>,
    pub intraday_multipliers: Vec<String>,
    pub has_daily: bool,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
}

impl LibrarySymbolInfo {
    pub fn for_asset(symbol_name: &str, asset: &BaseAsset, resolutions: &[Resolution]) -> Self {
        let ticker = if symbol_name.is_empty() {
            asset.address.clone()
        } else {
            symbol_name.to_string()
        };
        let name = asset.display_name();

        let seconds_multipliers = resolutions
            .iter()
            .filter(|r| r.is_seconds())
            .map(|r| r.seconds().to_string())
            .collect();
        let intraday_multipliers = resolutions
            .iter()
            .filter(|r| !r.is_seconds() && r.seconds() < 86_400)
            .map(|r| r.to_widget().to_string())
            .collect();

        Self {
            description: asset.name.clone().unwrap_or_else(|| name.clone()),
            name,
            ticker,
            symbol_type: "crypto".into(),
            session: "24x7".into(),
            timezone: "Etc/UTC".into(),
            exchange: EXCHANGE.into(),
            listed_exchange: EXCHANGE.into(),
            format: "price".into(),
            minmov: 1,
            pricescale: pricescale(asset.price_usd),
            has_intraday: true,
            has_seconds: resolutions.iter().any(Resolution::is_seconds),
            seconds_multipliers,
            intraday_multipliers,
            has_daily: true,
            has_weekly_and_monthly: true,
            supported_resolutions: widget_resolutions(resolutions),
            volume_precision: 2,
            data_status: "streaming".into(),
        }
    }
}

/// `min(10^digits(10000 / price), 1e16)`, where `digits` counts the decimal
/// digits of the integer part (at least one).
///
/// A $1 asset gets 5 decimals, a $0.00025 asset 8, a $50k asset 1.
pub fn pricescale(price: Option<f64>) -> u64 {
    let price = match price {
        Some(p) if p.is_finite() && p > 0.0 => p,
        _ => return DEFAULT_PRICESCALE,
    };
    // Saturating float → int cast; huge ratios land on the cap below.
    let whole = (10_000.0 / price).floor() as u64;
    let digits = whole.checked_ilog10().map_or(1, |d| d + 1);
    10u64
        .checked_pow(digits)
        .map_or(MAX_PRICESCALE, |scale| scale.min(MAX_PRICESCALE))
}

fn widget_resolutions(resolutions: &[Resolution]) -> Vec<String> {
    resolutions.iter().map(|r| r.to_widget().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricescale_by_magnitude() {
        assert_eq!(pricescale(Some(1.0)), 100_000);
        assert_eq!(pricescale(Some(0.00025)), 100_000_000);
        assert_eq!(pricescale(Some(50_000.0)), 10);
        assert_eq!(pricescale(Some(2_500.0)), 10);
        assert_eq!(pricescale(Some(0.5)), 100_000);
    }

    #[test]
    fn test_pricescale_caps_at_16_decimals() {
        assert_eq!(pricescale(Some(1e-12)), MAX_PRICESCALE);
        assert_eq!(pricescale(Some(f64::MIN_POSITIVE)), MAX_PRICESCALE);
    }

    #[test]
    fn test_pricescale_without_price() {
        assert_eq!(pricescale(None), DEFAULT_PRICESCALE);
        assert_eq!(pricescale(Some(0.0)), DEFAULT_PRICESCALE);
        assert_eq!(pricescale(Some(f64::NAN)), DEFAULT_PRICESCALE);
    }

    #[test]
    fn test_configuration_wire_shape() {
        let json = serde_json::to_value(DatafeedConfiguration::new(&Resolution::ALL)).unwrap();
        assert_eq!(json["supports_search"], false);
        assert_eq!(json["supports_marks"], false);
        assert_eq!(json["supports_time"], true);
        assert_eq!(
            json["supported_resolutions"],
            serde_json::json!(["1S", "5S", "15S", "30S", "1", "5", "15", "60", "240", "1D", "1W", "1M"])
        );
    }

    #[test]
    fn test_symbol_info_for_pool() {
        let mut asset = BaseAsset::pool("0xpool", "evm:1", "PEPE").with_price_usd(1.0);
        asset.quote_symbol = Some("WETH".into());
        let info = LibrarySymbolInfo::for_asset("PEPE", &asset, &Resolution::ALL);
        assert_eq!(info.name, "PEPE/WETH");
        assert_eq!(info.pricescale, 100_000);
        assert_eq!(info.seconds_multipliers, vec!["1", "5", "15", "30"]);
        assert_eq!(info.intraday_multipliers, vec!["1", "5", "15", "60", "240"]);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "crypto");
        assert_eq!(json["session"], "24x7");
    }

    #[test]
    fn test_symbol_info_ticker_falls_back_to_address() {
        let asset = BaseAsset::asset("0xtoken", "evm:1", "T");
        let info = LibrarySymbolInfo::for_asset("", &asset, &[Resolution::Minute1]);
        assert_eq!(info.ticker, "0xtoken");
        assert!(!info.has_seconds);
    }
}

//! Asset domain: what a chart is pointed at.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// The subject of a chart: a fungible asset or a liquidity pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseAsset {
    /// Asset id, or the pool address when `is_pair` is set.
    pub address: String,
    pub chain_id: String,
    #[serde(default)]
    pub is_pair: bool,
    /// Used to size the price scale.
    #[serde(default, rename = "priceUSD")]
    pub price_usd: Option<f64>,
    pub symbol: String,
    #[serde(default)]
    pub quote_symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl BaseAsset {
    pub fn asset(address: impl Into<String>, chain_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            chain_id: chain_id.into(),
            is_pair: false,
            price_usd: None,
            symbol: symbol.into(),
            quote_symbol: None,
            name: None,
        }
    }

    pub fn pool(address: impl Into<String>, chain_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            is_pair: true,
            ..Self::asset(address, chain_id, symbol)
        }
    }

    pub fn with_price_usd(mut self, price: f64) -> Self {
        self.price_usd = Some(price);
        self
    }

    /// Identity used in every dedup, subscription and cache key.
    pub fn identity(&self) -> &str {
        &self.address
    }

    pub fn target(&self) -> AssetTarget {
        if self.is_pair {
            AssetTarget::Pool {
                address: self.address.clone(),
            }
        } else {
            AssetTarget::Asset {
                asset: self.address.clone(),
            }
        }
    }

    /// Display name for the widget, e.g. `"PEPE/WETH"`.
    pub fn display_name(&self) -> String {
        match &self.quote_symbol {
            Some(quote) => format!("{}/{}", self.symbol, quote),
            None => self.symbol.clone(),
        }
    }
}

/// Pool-mode vs asset-mode addressing, as the backend expects it.
///
/// Serializes flat: `{"mode":"pool","address":..}` or `{"mode":"asset","asset":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AssetTarget {
    Pool { address: String },
    Asset { asset: String },
}

impl AssetTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Pool { .. } => "pool",
            Self::Asset { .. } => "asset",
        }
    }

    /// `(name, value)` query pair carrying the identity.
    pub fn identity_param(&self) -> (&'static str, &str) {
        match self {
            Self::Pool { address } => ("address", address),
            Self::Asset { asset } => ("asset", asset),
        }
    }
}

/// Shared mutable handle to the charted asset.
///
/// Cloning shares the cell. Long-lived callbacks hold a clone and read it at
/// call time, so a retarget through [`BaseAssetRef::set`] is visible to all of
/// them without rebuilding the datafeed.
#[derive(Debug, Clone)]
pub struct BaseAssetRef {
    inner: Arc<RwLock<BaseAsset>>,
}

impl BaseAssetRef {
    pub fn new(asset: BaseAsset) -> Self {
        Self {
            inner: Arc::new(RwLock::new(asset)),
        }
    }

    /// Snapshot of the current asset.
    pub fn get(&self) -> BaseAsset {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the asset in place.
    pub fn set(&self, asset: BaseAsset) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = asset;
    }

    pub fn identity(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .address
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_by_mode() {
        let pool = BaseAsset::pool("0xpool", "evm:1", "PEPE");
        assert_eq!(
            pool.target(),
            AssetTarget::Pool {
                address: "0xpool".into()
            }
        );
        let asset = BaseAsset::asset("0xtoken", "evm:1", "PEPE");
        assert_eq!(asset.target().mode(), "asset");
        assert_eq!(asset.target().identity_param(), ("asset", "0xtoken"));
    }

    #[test]
    fn test_target_serializes_flat_with_mode() {
        let json = serde_json::to_value(AssetTarget::Pool {
            address: "0xpool".into(),
        })
        .unwrap();
        assert_eq!(json["mode"], "pool");
        assert_eq!(json["address"], "0xpool");
    }

    #[test]
    fn test_base_asset_wire_names() {
        let asset: BaseAsset = serde_json::from_str(
            r#"{"address":"0xa","chainId":"evm:8453","isPair":true,"priceUSD":0.5,"symbol":"A"}"#,
        )
        .unwrap();
        assert!(asset.is_pair);
        assert_eq!(asset.price_usd, Some(0.5));
        assert_eq!(asset.chain_id, "evm:8453");
    }

    #[test]
    fn test_ref_clones_share_the_cell() {
        let cell = BaseAssetRef::new(BaseAsset::asset("a", "evm:1", "A"));
        let held_by_callback = cell.clone();
        cell.set(BaseAsset::pool("b", "evm:1", "B"));
        assert_eq!(held_by_callback.identity(), "b");
        assert!(held_by_callback.get().is_pair);
    }

    #[test]
    fn test_display_name() {
        let mut a = BaseAsset::asset("a", "evm:1", "PEPE");
        assert_eq!(a.display_name(), "PEPE");
        a.quote_symbol = Some("WETH".into());
        assert_eq!(a.display_name(), "PEPE/WETH");
    }
}

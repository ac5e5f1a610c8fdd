//! Domain modules organized as vertical slices.
//!
//! - `asset`: the charted asset or pool and its shared mutable cell
//! - `bar` - OHLCV bars, wire types, and the last-bar cache

pub mod asset;
pub mod bar;

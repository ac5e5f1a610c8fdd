//! Network URL constants for the Mobula API.

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.mobula.io";

/// Default OHLCV stream URL.
pub const DEFAULT_WS_URL: &str = "wss://api.mobula.io";

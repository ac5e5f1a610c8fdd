//! HTTP client layer: `MobulaHttp` with per-endpoint retry policies.

pub mod client;
pub mod retry;

pub use client::MobulaHttp;
pub use retry::{RetryConfig, RetryPolicy};

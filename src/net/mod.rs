//! Outbound HTTP plumbing: credential rotation and the resilient client.

mod client;
mod tokens;

pub use client::{ApiClient, RateLimitInfo, RetryPolicy};
pub use tokens::{ExhaustionPolicy, TokenPool};

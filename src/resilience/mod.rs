//! # Resilience Module
//!
//! Reusable resilience patterns for talking to venues.
//!
//! ## Components
//! - `retry_until_success`: exponential backoff with jitter, shutdown-aware

pub mod retry;

pub use retry::{retry_until_success, RetryError, RetryPolicy};

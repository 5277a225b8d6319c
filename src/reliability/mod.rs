//! Reliability helpers.

pub mod retry;

pub use retry::{RetryConfig, retry_async};

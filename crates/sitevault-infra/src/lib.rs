//! Sitevault Infrastructure Library
//!
//! Shared infrastructure used across sitevault services:
//! - Telemetry initialization (tracing subscriber)
//! - Retry executor with exponential backoff and per-attempt deadlines

pub mod retry;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

// Re-export commonly used types
pub use retry::{backoff_delay, retry, RetryPolicy, Retryable};

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

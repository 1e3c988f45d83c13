//! Timing policies.
//!
//! - [`ReconnectBackoff`] — capped linear delay between WebSocket redials
//! - [`RetryPolicy`] — opt-in retry of failed job-trigger calls

pub mod backoff;
pub mod retry;

pub use backoff::ReconnectBackoff;
pub use retry::{RetryConfig, RetryPolicy};

//! Adaptive concurrency module
//!
//! Implements AIMD (Additive Increase, Multiplicative Decrease) adjustment
//! of the queue's concurrency limit based on runtime attempt metrics.

mod adaptive;
mod metrics;

pub use adaptive::{AdaptiveConcurrency, StrategyAdjustment};
pub use metrics::{AttemptOutcome, LatencyHealth, RuntimeMetrics};

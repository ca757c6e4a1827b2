//! Upload admission queue
//!
//! A sliding-window scheduler that keeps a bounded number of async handler
//! calls in flight, retries failures with backoff, and reports progress.

mod concurrency;
mod retry;
mod scheduler;

pub use concurrency::{ConcurrencyController, NetworkQuality, DEFAULT_CONCURRENCY};
pub use retry::{
    Backoff, RetryDecision, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY,
    DEFAULT_MAX_RETRIES,
};
pub use scheduler::{ItemOutcome, QueueConfig, QueueItem, QueueReport, QueueStats, UploadQueue};

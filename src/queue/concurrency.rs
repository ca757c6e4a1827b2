//! Runtime-adjustable concurrency limit shared by the scheduler and its tuners

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Default number of parallel upload slots
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Coarse network quality signal (mirrors the browser `effectiveType` buckets)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Slow2g,
    Cellular2g,
    Cellular3g,
    Cellular4g,
}

impl NetworkQuality {
    /// Parse an `effectiveType` string such as `"4g"` or `"slow-2g"`
    pub fn from_effective_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(Self::Slow2g),
            "2g" => Some(Self::Cellular2g),
            "3g" => Some(Self::Cellular3g),
            "4g" => Some(Self::Cellular4g),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Limits {
    base: usize,
    current: AtomicUsize,
}

/// Cloneable handle over the concurrency limit.
///
/// The scheduler reads the current value each time it decides whether to
/// admit another item, so a change only affects future admissions.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    limits: Arc<Limits>,
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrencyController {
    pub fn new(base: usize) -> Self {
        let base = base.max(1);
        Self {
            limits: Arc::new(Limits {
                base,
                current: AtomicUsize::new(base),
            }),
        }
    }

    /// Current number of parallel slots
    pub fn get(&self) -> usize {
        self.limits.current.load(Ordering::Acquire)
    }

    /// Configured base value
    pub fn base(&self) -> usize {
        self.limits.base
    }

    /// Set the number of parallel slots (minimum 1)
    pub fn set(&self, concurrency: usize) {
        if concurrency == 0 {
            warn!("Ignoring concurrency of 0, clamping to 1");
        }
        let concurrency = concurrency.max(1);
        let old = self.limits.current.swap(concurrency, Ordering::AcqRel);
        if old != concurrency {
            info!("Concurrency {}→{}", old, concurrency);
        }
    }

    /// Restore the base value
    pub fn reset(&self) {
        self.set(self.limits.base);
    }

    /// Scale the limit to the reported network quality
    pub fn apply_network_quality(&self, quality: NetworkQuality) {
        let base = self.limits.base;
        let concurrency = match quality {
            NetworkQuality::Slow2g | NetworkQuality::Cellular2g => 1,
            NetworkQuality::Cellular3g => (base / 2).max(1),
            NetworkQuality::Cellular4g => base,
        };
        self.set(concurrency);
    }
}

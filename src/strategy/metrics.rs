//! Runtime metrics collection with EWMA smoothing

use std::collections::VecDeque;

/// Outcome of a single handler attempt
#[derive(Debug, Clone, Copy)]
pub struct AttemptOutcome {
    pub success: bool,
    pub latency_ms: u64,
}

/// Sliding-window metrics over recent attempts
pub struct RuntimeMetrics {
    /// EWMA smoothing factor (0.0-1.0, higher = more responsive to recent values)
    alpha: f64,
    /// Current EWMA latency in milliseconds
    ewma_latency_ms: f64,
    /// Latency captured when warmup completed; `None` until then
    baseline_latency_ms: Option<f64>,
    /// Recent attempt outcomes for success rate calculation
    outcomes: VecDeque<AttemptOutcome>,
    /// Maximum window size for outcomes
    window_size: usize,
    /// Count of attempts since last adjustment
    attempts_since_adjustment: usize,
    /// Whether the EWMA has seen its first sample
    initialized: bool,
}

impl RuntimeMetrics {
    pub fn new(alpha: f64, window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            alpha,
            ewma_latency_ms: 0.0,
            baseline_latency_ms: None,
            outcomes: VecDeque::with_capacity(window_size),
            window_size,
            attempts_since_adjustment: 0,
            initialized: false,
        }
    }

    /// Record an attempt outcome
    pub fn record(&mut self, outcome: AttemptOutcome) {
        self.update_ewma(outcome.latency_ms);

        if self.outcomes.len() >= self.window_size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
        self.attempts_since_adjustment += 1;
    }

    fn update_ewma(&mut self, latency_ms: u64) {
        let latency = latency_ms as f64;
        if !self.initialized {
            self.ewma_latency_ms = latency;
            self.initialized = true;
        } else {
            self.ewma_latency_ms = self.alpha * latency + (1.0 - self.alpha) * self.ewma_latency_ms;
        }
    }

    pub fn ewma_latency_ms(&self) -> f64 {
        self.ewma_latency_ms
    }

    pub fn baseline_latency_ms(&self) -> Option<f64> {
        self.baseline_latency_ms
    }

    /// Freeze the current EWMA as the latency baseline
    pub fn capture_baseline(&mut self) {
        if self.initialized {
            self.baseline_latency_ms = Some(self.ewma_latency_ms.max(1.0));
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let success_count = self.outcomes.iter().filter(|o| o.success).count();
        success_count as f64 / self.outcomes.len() as f64
    }

    pub fn has_minimum_samples(&self, min_samples: usize) -> bool {
        self.outcomes.len() >= min_samples
    }

    pub fn sample_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn attempts_since_adjustment(&self) -> usize {
        self.attempts_since_adjustment
    }

    /// Reset the adjustment counter (called after a strategy adjustment)
    pub fn reset_adjustment_counter(&mut self) {
        self.attempts_since_adjustment = 0;
    }

    /// Latency health relative to the captured baseline
    pub fn latency_health(&self) -> LatencyHealth {
        let Some(baseline) = self.baseline_latency_ms else {
            return LatencyHealth::Normal;
        };
        let ratio = self.ewma_latency_ms / baseline;
        if ratio <= 0.8 {
            LatencyHealth::Healthy
        } else if ratio <= 1.5 {
            LatencyHealth::Normal
        } else {
            LatencyHealth::High
        }
    }
}

/// Latency health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyHealth {
    Healthy,
    Normal,
    High,
}

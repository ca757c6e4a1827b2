//! AIMD (Additive Increase, Multiplicative Decrease) concurrency tuner

use crate::queue::ConcurrencyController;
use crate::strategy::metrics::{AttemptOutcome, LatencyHealth, RuntimeMetrics};
use tracing::info;

/// Minimum concurrency allowed
const MIN_CONCURRENCY: usize = 1;
/// Minimum samples before making adjustments
const MIN_SAMPLES: usize = 10;
/// Cooldown period (attempts between adjustments)
const COOLDOWN_ATTEMPTS: usize = 5;
/// Success rate threshold for downgrade
const DOWNGRADE_SUCCESS_THRESHOLD: f64 = 0.70;
/// Success rate threshold for upgrade
const UPGRADE_SUCCESS_THRESHOLD: f64 = 0.95;
/// Warmup attempt count
const WARMUP_ATTEMPTS: usize = 5;
/// Warmup success threshold
const WARMUP_SUCCESS_THRESHOLD: f64 = 0.90;
/// Maximum warmup attempts before forced exit
const MAX_WARMUP_ATTEMPTS: usize = 10;
/// EWMA alpha for smoothing
const EWMA_ALPHA: f64 = 0.2;
/// Metrics window size
const METRICS_WINDOW_SIZE: usize = 20;

/// Strategy adjustment direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyAdjustment {
    Upgrade,
    Downgrade,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WarmupState {
    Active,
    Completed,
}

/// Adjusts a [`ConcurrencyController`] from observed attempt outcomes.
///
/// Starts at one slot, jumps to the controller's configured value once a
/// short warmup succeeds, then halves on trouble and adds one slot at a time
/// while attempts stay healthy.
pub struct AdaptiveConcurrency {
    controller: ConcurrencyController,
    /// Ceiling for upgrades (the controller's value when the tuner was built)
    target_concurrency: usize,
    metrics: RuntimeMetrics,
    warmup_state: WarmupState,
    warmup_attempt_count: usize,
}

impl AdaptiveConcurrency {
    pub fn new(controller: ConcurrencyController) -> Self {
        let target_concurrency = controller.get().max(MIN_CONCURRENCY);
        controller.set(MIN_CONCURRENCY);

        info!(
            "Adaptive concurrency initialized: start={}, target={}",
            MIN_CONCURRENCY, target_concurrency
        );

        Self {
            controller,
            target_concurrency,
            metrics: RuntimeMetrics::new(EWMA_ALPHA, METRICS_WINDOW_SIZE),
            warmup_state: WarmupState::Active,
            warmup_attempt_count: 0,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.controller.get()
    }

    pub fn target_concurrency(&self) -> usize {
        self.target_concurrency
    }

    /// Record an attempt outcome and potentially adjust the controller
    pub fn record_outcome(&mut self, success: bool, latency_ms: u64) -> StrategyAdjustment {
        self.metrics.record(AttemptOutcome {
            success,
            latency_ms,
        });

        if self.warmup_state == WarmupState::Active {
            self.warmup_attempt_count += 1;
            return self.check_warmup_exit();
        }

        self.evaluate_adjustment()
    }

    fn check_warmup_exit(&mut self) -> StrategyAdjustment {
        if self.warmup_attempt_count < WARMUP_ATTEMPTS {
            return StrategyAdjustment::NoChange;
        }

        let success_rate = self.metrics.success_rate();

        if success_rate >= WARMUP_SUCCESS_THRESHOLD {
            info!(
                "Warmup success: jumping to target concurrency {} (success_rate={:.1}%)",
                self.target_concurrency,
                success_rate * 100.0
            );
            self.finish_warmup();
            self.controller.set(self.target_concurrency);
            return StrategyAdjustment::Upgrade;
        }

        if success_rate < DOWNGRADE_SUCCESS_THRESHOLD
            || self.warmup_attempt_count >= MAX_WARMUP_ATTEMPTS
        {
            info!(
                "Warmup ended after {} attempts: keeping concurrency={} (success_rate={:.1}%)",
                self.warmup_attempt_count,
                self.controller.get(),
                success_rate * 100.0
            );
            self.finish_warmup();
        }

        StrategyAdjustment::NoChange
    }

    fn finish_warmup(&mut self) {
        self.warmup_state = WarmupState::Completed;
        self.metrics.capture_baseline();
        self.metrics.reset_adjustment_counter();
    }

    fn evaluate_adjustment(&mut self) -> StrategyAdjustment {
        if !self.metrics.has_minimum_samples(MIN_SAMPLES) {
            return StrategyAdjustment::NoChange;
        }

        if self.metrics.attempts_since_adjustment() < COOLDOWN_ATTEMPTS {
            return StrategyAdjustment::NoChange;
        }

        let success_rate = self.metrics.success_rate();
        let latency_health = self.metrics.latency_health();

        let adjustment =
            if success_rate < DOWNGRADE_SUCCESS_THRESHOLD || latency_health == LatencyHealth::High {
                self.apply_downgrade(success_rate, latency_health)
            } else if success_rate > UPGRADE_SUCCESS_THRESHOLD
                && latency_health != LatencyHealth::High
            {
                self.apply_upgrade(success_rate)
            } else {
                StrategyAdjustment::NoChange
            };

        if adjustment != StrategyAdjustment::NoChange {
            self.metrics.reset_adjustment_counter();
        }

        adjustment
    }

    fn apply_downgrade(
        &mut self,
        success_rate: f64,
        latency_health: LatencyHealth,
    ) -> StrategyAdjustment {
        let old_concurrency = self.controller.get();
        let new_concurrency = (old_concurrency / 2).max(MIN_CONCURRENCY);
        if new_concurrency == old_concurrency {
            return StrategyAdjustment::NoChange;
        }

        let reason = if latency_health == LatencyHealth::High {
            "high_latency"
        } else {
            "low_success_rate"
        };

        info!(
            "Strategy DOWNGRADE ({}): concurrency {}→{}, success_rate={:.1}%, ewma={:.0}ms",
            reason,
            old_concurrency,
            new_concurrency,
            success_rate * 100.0,
            self.metrics.ewma_latency_ms()
        );
        self.controller.set(new_concurrency);

        StrategyAdjustment::Downgrade
    }

    fn apply_upgrade(&mut self, success_rate: f64) -> StrategyAdjustment {
        let old_concurrency = self.controller.get();
        if old_concurrency >= self.target_concurrency {
            return StrategyAdjustment::NoChange;
        }
        let new_concurrency = old_concurrency + 1;

        info!(
            "Strategy UPGRADE: concurrency {}→{}, success_rate={:.1}%, ewma={:.0}ms",
            old_concurrency,
            new_concurrency,
            success_rate * 100.0,
            self.metrics.ewma_latency_ms()
        );
        self.controller.set(new_concurrency);

        StrategyAdjustment::Upgrade
    }
}

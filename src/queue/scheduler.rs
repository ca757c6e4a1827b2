//! Upload queue - sliding-window scheduler with retry and progress reporting

use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::concurrency::{ConcurrencyController, DEFAULT_CONCURRENCY};
use super::retry::{RetryDecision, RetryPolicy};
use crate::strategy::AdaptiveConcurrency;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Tune concurrency from attempt outcomes (AIMD)
    pub adaptive: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            adaptive: false,
        }
    }
}

/// A unit of work waiting in (or travelling through) the queue
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub id: String,
    pub data: T,
    pub attempts: u32,
}

/// Point-in-time queue counters.
///
/// `pending + successful + failed` equals the number of items accepted since
/// the last `clear()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: usize,
    pub successful: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.successful + self.failed
    }
}

/// Terminal result for one item
#[derive(Debug)]
pub struct ItemOutcome<O, E> {
    pub id: String,
    pub attempts: u32,
    pub result: Result<O, E>,
}

/// Result of one `process_queue` run
#[derive(Debug)]
pub struct QueueReport<O, E> {
    pub outcomes: Vec<ItemOutcome<O, E>>,
    pub stats: QueueStats,
}

impl<O, E> QueueReport<O, E> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &O)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|v| (o.id.as_str(), v)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &E)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.id.as_str(), e)))
    }
}

struct QueueState<T> {
    pending: VecDeque<QueueItem<T>>,
    /// Ids that are pending or in flight
    active_ids: HashSet<String>,
    stats: QueueStats,
    /// Advanced by `clear()`; results from older epochs are discarded
    epoch: u64,
}

struct Attempt<T, O, E> {
    item: QueueItem<T>,
    /// `None` when the queue was cleared before the handler ran
    result: Option<Result<O, E>>,
    elapsed: Duration,
}

/// Drains a dynamic work list through an async handler, keeping at most
/// `concurrency()` items in flight and retrying failures per the policy.
pub struct UploadQueue<T> {
    state: Mutex<QueueState<T>>,
    controller: ConcurrencyController,
    retry: RetryPolicy,
    tuner: Option<Mutex<AdaptiveConcurrency>>,
    /// Wakes retries sleeping through their backoff when the queue is cleared
    cleared: Notify,
}

impl<T: Clone> UploadQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let controller = ConcurrencyController::new(config.concurrency);
        Self::with_controller(config, controller)
    }

    /// Build a queue around an existing controller, e.g. one shared with a
    /// network-quality monitor. `config.concurrency` is ignored.
    pub fn with_controller(config: QueueConfig, controller: ConcurrencyController) -> Self {
        let tuner = config
            .adaptive
            .then(|| Mutex::new(AdaptiveConcurrency::new(controller.clone())));
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                active_ids: HashSet::new(),
                stats: QueueStats::default(),
                epoch: 0,
            }),
            controller,
            retry: config.retry,
            tuner,
            cleared: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        // Critical sections never run caller code, so a poisoned lock still
        // holds consistent counters.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an item. Returns `false` if `id` is already pending or in flight.
    pub fn enqueue(&self, id: impl Into<String>, data: T) -> bool {
        let id = id.into();
        let mut state = self.state();
        if !state.active_ids.insert(id.clone()) {
            debug!("Item {} already queued, ignoring", id);
            return false;
        }
        state.pending.push_back(QueueItem {
            id,
            data,
            attempts: 0,
        });
        state.stats.pending += 1;
        true
    }

    /// Register several items; returns how many were accepted
    pub fn enqueue_batch<I, S>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
    {
        items
            .into_iter()
            .map(|(id, data)| self.enqueue(id, data))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn stats(&self) -> QueueStats {
        self.state().stats
    }

    pub fn concurrency(&self) -> usize {
        self.controller.get()
    }

    pub fn set_concurrency(&self, concurrency: usize) {
        self.controller.set(concurrency);
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    /// Drop pending items and zero the counters. Calls already in flight keep
    /// running, but their results are ignored. Retries waiting out a backoff
    /// are dropped without calling the handler again.
    pub fn clear(&self) {
        let dropped = {
            let mut state = self.state();
            let dropped = state.pending.len();
            state.pending.clear();
            state.active_ids.clear();
            state.stats = QueueStats::default();
            state.epoch += 1;
            dropped
        };
        self.cleared.notify_waiters();
        info!("Queue cleared ({} pending items dropped)", dropped);
    }

    /// Drain the queue. See [`UploadQueue::process_queue_with_progress`].
    pub async fn process_queue<F, Fut, O, E>(&self, handler: F) -> QueueReport<O, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
    {
        self.process_queue_with_progress(handler, |_| {}).await
    }

    /// Drain the queue, calling `on_progress` after every item reaches a
    /// terminal state. Returns once nothing is pending or in flight.
    pub async fn process_queue_with_progress<F, Fut, O, E, P>(
        &self,
        handler: F,
        on_progress: P,
    ) -> QueueReport<O, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
        P: FnMut(QueueStats),
    {
        self.process_queue_classified(handler, |_| true, on_progress)
            .await
    }

    /// Like [`UploadQueue::process_queue_with_progress`], but errors for which
    /// `is_retryable` returns `false` fail the item on the spot.
    pub async fn process_queue_classified<F, Fut, O, E, R, P>(
        &self,
        handler: F,
        is_retryable: R,
        mut on_progress: P,
    ) -> QueueReport<O, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, E>>,
        E: Display,
        R: Fn(&E) -> bool,
        P: FnMut(QueueStats),
    {
        let epoch = self.state().epoch;
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes = Vec::new();

        loop {
            while in_flight.len() < self.controller.get() {
                let Some(item) = self.next_item(epoch) else {
                    break;
                };
                in_flight.push(self.attempt(&handler, item, Duration::ZERO, epoch));
            }

            let Some(Attempt {
                item,
                result,
                elapsed,
            }) = in_flight.next().await
            else {
                break;
            };

            let Some(result) = result.filter(|_| self.state().epoch == epoch) else {
                debug!("Discarding result for {} from a cleared queue", item.id);
                continue;
            };

            if let Some(tuner) = &self.tuner {
                tuner
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_outcome(result.is_ok(), elapsed.as_millis() as u64);
            }

            match result {
                Ok(output) => {
                    let stats = self.finish(&item.id, true);
                    outcomes.push(ItemOutcome {
                        id: item.id,
                        attempts: item.attempts,
                        result: Ok(output),
                    });
                    on_progress(stats);
                }
                Err(e) => match self.decide(item.attempts, &e, &is_retryable) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "Item {} failed (attempt {}/{}), retrying in {}ms: {}",
                            item.id,
                            item.attempts,
                            self.retry.max_retries + 1,
                            delay.as_millis(),
                            e
                        );
                        in_flight.push(self.attempt(&handler, item, delay, epoch));
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            "Item {} failed after {} attempt(s): {}",
                            item.id, item.attempts, e
                        );
                        let stats = self.finish(&item.id, false);
                        outcomes.push(ItemOutcome {
                            id: item.id,
                            attempts: item.attempts,
                            result: Err(e),
                        });
                        on_progress(stats);
                    }
                },
            }
        }

        let stats = self.stats();
        info!(
            "Queue drained: {} successful, {} failed, {} pending",
            stats.successful, stats.failed, stats.pending
        );
        QueueReport { outcomes, stats }
    }

    fn decide<E>(
        &self,
        attempt: u32,
        error: &E,
        is_retryable: impl Fn(&E) -> bool,
    ) -> RetryDecision {
        if is_retryable(error) {
            self.retry.decide(attempt)
        } else {
            RetryDecision::GiveUp
        }
    }

    fn next_item(&self, epoch: u64) -> Option<QueueItem<T>> {
        let mut state = self.state();
        if state.epoch != epoch {
            return None;
        }
        state.pending.pop_front()
    }

    /// Record a terminal outcome and return the updated counters
    fn finish(&self, id: &str, success: bool) -> QueueStats {
        let mut state = self.state();
        state.active_ids.remove(id);
        state.stats.pending = state.stats.pending.saturating_sub(1);
        if success {
            state.stats.successful += 1;
        } else {
            state.stats.failed += 1;
        }
        state.stats
    }

    async fn attempt<F, Fut, O, E>(
        &self,
        handler: &F,
        mut item: QueueItem<T>,
        delay: Duration,
        epoch: u64,
    ) -> Attempt<T, O, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        if !delay.is_zero() {
            let cleared = self.cleared.notified();
            tokio::pin!(cleared);
            // Register before the epoch check so a concurrent clear() is not missed
            cleared.as_mut().enable();
            if self.state().epoch == epoch {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut cleared => {}
                }
            }
        } else if item.attempts > 0 {
            tokio::task::yield_now().await;
        }

        if self.state().epoch != epoch {
            return Attempt {
                item,
                result: None,
                elapsed: Duration::ZERO,
            };
        }

        item.attempts += 1;
        let started = Instant::now();
        let result = handler(item.data.clone()).await;
        Attempt {
            item,
            result: Some(result),
            elapsed: started.elapsed(),
        }
    }
}

//! Priority-aware admission queue with throttling and timeouts.
//!
//! Every request passes through [`RequestGovernor::submit`]. Admission either
//! rejects it, delays it (throttling), or queues it. A drain step hands out
//! execution grants while fewer than `max_concurrent` requests are active;
//! the caller then runs its work raced against its timeout.

pub mod error;
pub mod queue;
pub mod stats;
pub mod throttle;

pub use error::{RequestError, WorkError};
pub use queue::PriorityQueue;
pub use stats::{GovernorStats, RollingWindow, StatsTracker};

use crate::config::{RequestConfigUpdate, RequestGovernorConfig};
use crate::error::Result;
use crate::monitor::PerformanceSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Resource pressure as seen by the governor
pub trait StressSignal: Send + Sync {
    fn is_under_stress(&self) -> bool;

    /// Recent average usage
    fn summary(&self) -> PerformanceSummary {
        PerformanceSummary::default()
    }
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub active_count: usize,
    /// Decision taken for the most recent submission
    pub throttling: bool,
    pub estimated_wait_ms: u64,
}

#[derive(Clone)]
pub struct RequestGovernor {
    inner: Arc<GovernorInner>,
}

struct GovernorInner {
    stress: Arc<dyn StressSignal>,
    state: Mutex<GovernorState>,
    next_id: AtomicU64,
    /// Notified whenever the active set becomes empty
    idle: Notify,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

struct GovernorState {
    config: RequestGovernorConfig,
    queue: PriorityQueue<Pending>,
    /// Active request ids with the channel used to evict them on shutdown
    active: HashMap<u64, oneshot::Sender<RequestError>>,
    stats: StatsTracker,
    throttling: bool,
    shutting_down: bool,
}

/// A queued request waiting for its grant
struct Pending {
    id: u64,
    enqueued_at: Instant,
    timeout: Duration,
    grant: oneshot::Sender<std::result::Result<Grant, RequestError>>,
}

/// Permission to execute; owns the request's concurrency slot
struct Grant {
    slot: ActiveSlot,
    evicted: oneshot::Receiver<RequestError>,
}

/// Releases the slot on drop, so a cancelled caller frees its capacity
struct ActiveSlot {
    inner: Arc<GovernorInner>,
    id: u64,
    wait: Duration,
    armed: bool,
}

impl ActiveSlot {
    fn finish(mut self, processing: Duration, succeeded: bool) {
        self.armed = false;
        release(&self.inner, self.id, Some((self.wait, processing, succeeded)));
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        if self.armed {
            release(&self.inner, self.id, None);
        }
    }
}

/// Held while a request waits in the queue; a dropped caller takes its entry out
struct QueueTicket {
    inner: Arc<GovernorInner>,
    id: u64,
    armed: bool,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.inner.state);
        let id = self.id;
        if state.queue.remove_first(|pending| pending.id == id).is_some() {
            state.stats.record_failed();
            state.stats.recompute();
            debug!(id, "Queued request abandoned by its caller");
        }
    }
}

enum Admission {
    Queued(oneshot::Receiver<std::result::Result<Grant, RequestError>>),
    Delayed(Duration),
}

impl RequestGovernor {
    /// Create the governor and its periodic stats task.
    ///
    /// Fails with `ConfigValidationError` when `config` does not validate.
    pub fn new(config: RequestGovernorConfig, stress: Arc<dyn StressSignal>) -> Result<Self> {
        config.validate()?;

        let stats_interval = config.stats_interval();
        let state = GovernorState {
            stats: StatsTracker::new(config.latency_window, config.throughput_window),
            config,
            queue: PriorityQueue::new(),
            active: HashMap::new(),
            throttling: false,
            shutting_down: false,
        };

        let inner = Arc::new(GovernorInner {
            stress,
            state: Mutex::new(state),
            next_id: AtomicU64::new(0),
            idle: Notify::new(),
            stats_task: Mutex::new(None),
        });

        let task = tokio::spawn(run_stats(Arc::downgrade(&inner), stats_interval));
        *lock(&inner.stats_task) = Some(task);

        Ok(Self { inner })
    }

    /// Submit work and wait for its outcome.
    ///
    /// `priority` is clamped to `[1, priority_levels]`; `timeout` defaults to
    /// the configured default. The work future runs on its own task; when it
    /// times out it is abandoned, not cancelled, and runs to completion.
    pub async fn submit<F, Fut, T, E>(
        &self,
        work: F,
        priority: u8,
        timeout: Option<Duration>,
    ) -> std::result::Result<T, RequestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<WorkError> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stressed = self.inner.stress.is_under_stress();
        let summary = self.inner.stress.summary();

        let (priority, timeout, admission) = {
            let mut state = lock(&self.inner.state);
            if let Err(e) = check_admission(&state) {
                state.stats.record_rejected();
                debug!(id, "Request rejected: {}", e);
                return Err(e);
            }

            let priority = priority.clamp(1, state.config.priority_levels);
            let timeout = timeout.unwrap_or_else(|| state.config.default_timeout());

            let throttle =
                throttle::should_throttle(stressed, &summary, state.queue.len(), &state.config);
            state.throttling = throttle;

            let admission = if throttle {
                Admission::Delayed(throttle::throttle_delay(
                    &state.config.throttle,
                    state.queue.len(),
                    state.config.max_queue_size,
                    stressed,
                ))
            } else {
                Admission::Queued(enqueue(&self.inner, &mut state, id, priority, timeout))
            };
            (priority, timeout, admission)
        };

        let granted = match admission {
            Admission::Queued(granted) => granted,
            Admission::Delayed(delay) => {
                debug!(id, delay_ms = delay.as_millis() as u64, "Throttling request");
                sleep(delay).await;

                let mut state = lock(&self.inner.state);
                if let Err(e) = check_admission(&state) {
                    state.stats.record_rejected();
                    debug!(id, "Request rejected after throttle delay: {}", e);
                    return Err(e);
                }
                enqueue(&self.inner, &mut state, id, priority, timeout)
            }
        };

        let mut ticket = QueueTicket {
            inner: self.inner.clone(),
            id,
            armed: true,
        };
        let granted = granted.await;
        ticket.armed = false;

        let Grant { slot, mut evicted } = match granted {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(RequestError::ShuttingDown),
        };

        let started = Instant::now();
        let mut handle = tokio::spawn(work());

        let outcome = tokio::select! {
            joined = &mut handle => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(RequestError::Failed(e.into())),
                Err(e) => Err(RequestError::Failed(format!("work task failed: {}", e).into())),
            },
            _ = sleep(timeout) => Err(RequestError::ExecutionTimeout(timeout)),
            Ok(reason) = &mut evicted => Err(reason),
        };

        slot.finish(started.elapsed(), outcome.is_ok());
        outcome
    }

    /// Submit with priority 1 and the default timeout
    pub async fn submit_default<F, Fut, T, E>(&self, work: F) -> std::result::Result<T, RequestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<WorkError> + Send + 'static,
    {
        self.submit(work, 1, None).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        let state = lock(&self.inner.state);
        let queue_length = state.queue.len();

        let estimated_wait_ms = if queue_length == 0 {
            0
        } else {
            let rounds = queue_length.div_ceil(state.config.max_concurrent);
            (rounds as f64 * state.stats.expected_processing_ms()).round() as u64
        };

        QueueStatus {
            queue_length,
            active_count: state.active.len(),
            throttling: state.throttling,
            estimated_wait_ms,
        }
    }

    pub fn stats(&self) -> GovernorStats {
        let state = lock(&self.inner.state);
        state.stats.snapshot(state.queue.len(), state.active.len())
    }

    pub fn config(&self) -> RequestGovernorConfig {
        lock(&self.inner.state).config.clone()
    }

    /// Merge a partial update; rejected updates leave the config untouched
    pub fn update_config(&self, update: RequestConfigUpdate) -> Result<()> {
        let mut state = lock(&self.inner.state);
        let next = state.config.merged(&update);
        next.validate()?;

        info!(
            max_concurrent = next.max_concurrent,
            max_queue_size = next.max_queue_size,
            "Request governor configuration updated"
        );
        state.config = next;

        // A higher concurrency limit may free slots right away
        drain(&self.inner, &mut state);
        Ok(())
    }

    /// Reject every queued request; active work is untouched
    pub fn clear_queue(&self) -> usize {
        let mut state = lock(&self.inner.state);
        let cleared = reject_queued(&mut state, || RequestError::QueueCleared);
        if cleared > 0 {
            info!(cleared, "Request queue cleared");
        }
        cleared
    }

    /// Clear the queue, let active work finish within the grace period,
    /// then evict whatever is still running
    pub async fn shutdown(&self) {
        let grace = {
            let mut state = lock(&self.inner.state);
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            reject_queued(&mut state, || RequestError::ShuttingDown);
            state.config.shutdown_grace()
        };

        info!("Shutting down request governor");
        if let Some(task) = lock(&self.inner.stats_task).take() {
            task.abort();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if lock(&self.inner.state).active.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                break;
            }
        }

        let mut state = lock(&self.inner.state);
        let evicted = state.active.len();
        for (_, evict) in state.active.drain() {
            let _ = evict.send(RequestError::ShuttingDown);
        }
        for _ in 0..evicted {
            state.stats.record_failed();
        }
        if evicted > 0 {
            warn!(evicted, "Evicted active requests after shutdown grace period");
        }
        state.stats.recompute();
        info!("Request governor shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }
}

fn check_admission(state: &GovernorState) -> std::result::Result<(), RequestError> {
    if state.shutting_down {
        return Err(RequestError::ShuttingDown);
    }

    // With an empty queue and a free slot the request goes straight to
    // execution, even when max_queue_size is 0
    let queue_full = state.queue.len() >= state.config.max_queue_size
        && (state.active.len() >= state.config.max_concurrent || !state.queue.is_empty());
    if queue_full {
        return Err(RequestError::QueueFull);
    }
    Ok(())
}

fn enqueue(
    inner: &Arc<GovernorInner>,
    state: &mut GovernorState,
    id: u64,
    priority: u8,
    timeout: Duration,
) -> oneshot::Receiver<std::result::Result<Grant, RequestError>> {
    let (grant, granted) = oneshot::channel();
    let position = state.queue.push(
        priority,
        Pending {
            id,
            enqueued_at: Instant::now(),
            timeout,
            grant,
        },
    );
    state.stats.record_submitted();
    debug!(id, priority, position, "Request queued");

    drain(inner, state);
    granted
}

/// Hand out grants while slots are free
fn drain(inner: &Arc<GovernorInner>, state: &mut GovernorState) {
    while state.active.len() < state.config.max_concurrent {
        let Some((_, pending)) = state.queue.pop() else {
            break;
        };

        let waited = pending.enqueued_at.elapsed();
        if waited > pending.timeout {
            state.stats.record_failed();
            debug!(id = pending.id, "Request timed out in queue");
            let _ = pending
                .grant
                .send(Err(RequestError::QueueTimeout(pending.timeout)));
            continue;
        }

        let (evict, evicted) = oneshot::channel();
        state.active.insert(pending.id, evict);

        let grant = Grant {
            slot: ActiveSlot {
                inner: inner.clone(),
                id: pending.id,
                wait: waited,
                armed: true,
            },
            evicted,
        };

        // The caller went away; undo without re-entering the lock
        if let Err(Ok(mut grant)) = pending.grant.send(Ok(grant)) {
            grant.slot.armed = false;
            state.active.remove(&pending.id);
        }
    }
}

fn release(inner: &Arc<GovernorInner>, id: u64, outcome: Option<(Duration, Duration, bool)>) {
    let mut state = lock(&inner.state);

    if state.active.remove(&id).is_some() {
        match outcome {
            Some((wait, processing, true)) => state.stats.record_completed(wait, processing),
            _ => state.stats.record_failed(),
        }
        state.stats.recompute();
    }

    if state.active.is_empty() {
        inner.idle.notify_waiters();
    }

    drain(inner, &mut state);
}

fn reject_queued(state: &mut GovernorState, reason: impl Fn() -> RequestError) -> usize {
    let mut rejected = 0;
    for (_, pending) in state.queue.drain() {
        let _ = pending.grant.send(Err(reason()));
        rejected += 1;
    }
    rejected
}

async fn run_stats(inner: Weak<GovernorInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mut state = lock(&inner.state);
        state.stats.recompute();
        let stats = state.stats.snapshot(state.queue.len(), state.active.len());
        debug!(
            queued = stats.queued,
            active = stats.active,
            completed = stats.completed,
            failed = stats.failed,
            throughput_per_minute = stats.throughput_per_minute,
            "Request governor stats"
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Bounded parallel drain over the durable job substrate.
//!
//! Guarantees:
//! - FIFO pickup within the single priority class.
//! - At most `concurrency` jobs in flight per process.
//! - One record per order id at any time (substrate dedup), so one order is
//!   never processed concurrently with itself.
//! - Handler errors trigger exponential-backoff re-delivery until the
//!   attempt budget is spent, then the record parks as `Failed`.
//!
//! Terminal records stay in the substrate for a retention window
//! (bookkeeping, not correctness) and are pruned by `sweep_retention`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::time::now_ms;
use corelib::error::EngineError;
use corelib::job::Job;

use crate::substrate::{JobRecord, JobState, QueueSubstrate};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Max jobs in non-terminal processing simultaneously.
    pub concurrency: usize,
    /// Total deliveries per job, including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    pub backoff_max: Duration,
    /// How long completed records linger before the sweep removes them.
    pub completed_retention: Duration,
    /// Failed records are kept longer for postmortems.
    pub failed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            backoff_max: Duration::from_secs(4),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// What a worker does with one job. Errors are re-delivered with backoff;
/// business failures the worker already settled must return `Ok`.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn process(&self, job: Job) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
struct Gauges {
    active: Arc<AtomicU64>,
    delayed: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

pub struct WorkQueue {
    substrate: Arc<dyn QueueSubstrate>,
    config: QueueConfig,
    pending: Mutex<VecDeque<Uuid>>,
    paused: AtomicBool,
    stopping: AtomicBool,
    notify: Notify,
    permits: Arc<Semaphore>,
    gauges: Gauges,
}

impl WorkQueue {
    pub fn new(substrate: Arc<dyn QueueSubstrate>, config: QueueConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            substrate,
            config,
            pending: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            notify: Notify::new(),
            permits,
            gauges: Gauges::default(),
        }
    }

    /// Insert a job keyed by its order id. Re-enqueue of an id that already
    /// has a live (or retained terminal) record is a no-op; returns whether
    /// the job was actually added.
    pub async fn enqueue(&self, job: Job) -> Result<bool, EngineError> {
        let order_id = job.order_id;
        let record = JobRecord::waiting(job, now_ms());

        let inserted = self
            .substrate
            .put_if_absent(&record)
            .await
            .map_err(substrate_error)?;

        if !inserted {
            debug!(%order_id, "duplicate enqueue ignored");
            return Ok(false);
        }

        self.pending.lock().push_back(order_id);
        self.notify.notify_one();
        debug!(%order_id, "job enqueued");
        Ok(true)
    }

    /// Re-queue every non-terminal record left over from a previous run.
    /// At-least-once: an `Active` record whose process died is replayed.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let records = self.substrate.scan().await.map_err(substrate_error)?;

        let mut restored = 0;
        for mut record in records {
            if record.state.is_terminal() {
                continue;
            }
            record.state = JobState::Waiting;
            record.not_before_ms = 0;
            record.updated_ms = now_ms();
            self.substrate
                .update(&record)
                .await
                .map_err(substrate_error)?;
            self.pending.lock().push_back(record.job.order_id);
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "restored jobs from substrate");
            self.notify.notify_one();
        }
        Ok(restored)
    }

    /// Drain loop. Runs until [`WorkQueue::shutdown`]; spawned jobs keep
    /// running past loop exit and are awaited via [`WorkQueue::wait_for_idle`].
    pub async fn run(self: Arc<Self>, handler: Arc<dyn JobHandler>) {
        info!(
            concurrency = self.config.concurrency,
            max_attempts = self.config.max_attempts,
            "work queue started"
        );

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            if self.paused.load(Ordering::SeqCst) {
                self.notify.notified().await;
                continue;
            }

            let next = self.pending.lock().pop_front();
            let Some(order_id) = next else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
                continue;
            };

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let mut record = match self.substrate.get(&order_id).await {
                Ok(Some(r)) if r.state == JobState::Waiting => r,
                Ok(_) => {
                    // Drained or already settled while queued.
                    continue;
                }
                Err(e) => {
                    error!(%order_id, error = %e, "substrate read failed; dropping pickup");
                    continue;
                }
            };

            record.state = JobState::Active;
            record.attempts += 1;
            record.job.attempt = record.attempts;
            record.updated_ms = now_ms();
            if let Err(e) = self.substrate.update(&record).await {
                error!(%order_id, error = %e, "substrate write failed; job returned to queue");
                self.pending.lock().push_back(order_id);
                continue;
            }

            self.gauges.active.fetch_add(1, Ordering::SeqCst);

            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let job = record.job.clone();
                debug!(order_id = %job.order_id, attempt = job.attempt, "job dispatched");
                let result = handler.process(job).await;
                queue.settle(record, result).await;
                drop(permit);
            });
        }

        info!("work queue loop exited");
    }

    async fn settle(self: Arc<Self>, mut record: JobRecord, result: anyhow::Result<()>) {
        self.gauges.active.fetch_sub(1, Ordering::SeqCst);
        let order_id = record.job.order_id;

        match result {
            Ok(()) => {
                record.state = JobState::Completed;
                record.updated_ms = now_ms();
                record.last_error = None;
                if let Err(e) = self.substrate.update(&record).await {
                    error!(%order_id, error = %e, "failed to persist job completion");
                }
                self.gauges.completed.fetch_add(1, Ordering::SeqCst);
                debug!(%order_id, attempts = record.attempts, "job completed");
            }
            Err(err) => {
                record.last_error = Some(err.to_string());
                if record.attempts >= self.config.max_attempts {
                    record.state = JobState::Failed;
                    record.updated_ms = now_ms();
                    if let Err(e) = self.substrate.update(&record).await {
                        error!(%order_id, error = %e, "failed to persist job failure");
                    }
                    self.gauges.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        %order_id,
                        attempts = record.attempts,
                        error = %err,
                        "job failed permanently"
                    );
                } else {
                    let delay = self.redelivery_delay(record.attempts);
                    record.state = JobState::Delayed;
                    record.not_before_ms = now_ms() + delay.as_millis() as u64;
                    record.updated_ms = now_ms();
                    if let Err(e) = self.substrate.update(&record).await {
                        error!(%order_id, error = %e, "failed to persist job delay");
                    }
                    self.gauges.delayed.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        %order_id,
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job delivery failed; backing off"
                    );

                    let queue = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.redeliver(order_id).await;
                    });
                }
            }
        }
    }

    async fn redeliver(&self, order_id: Uuid) {
        match self.substrate.get(&order_id).await {
            Ok(Some(mut record)) if record.state == JobState::Delayed => {
                record.state = JobState::Waiting;
                record.updated_ms = now_ms();
                if let Err(e) = self.substrate.update(&record).await {
                    error!(%order_id, error = %e, "failed to persist redelivery");
                    return;
                }
                self.gauges.delayed.fetch_sub(1, Ordering::SeqCst);
                self.pending.lock().push_back(order_id);
                self.notify.notify_one();
                debug!(%order_id, "job redelivered");
            }
            Ok(_) => {} // removed or settled in the meantime
            Err(e) => error!(%order_id, error = %e, "substrate read failed during redelivery"),
        }
    }

    /// `min(base * multiplier^(n-1), max)` for failed attempt `n`.
    fn redelivery_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        self.config.backoff_base.mul_f64(exp).min(self.config.backoff_max)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("work queue paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_one();
        info!("work queue resumed");
    }

    /// Remove jobs that have not started yet. Active and delayed jobs are
    /// left alone.
    pub async fn drain(&self) -> usize {
        let drained: Vec<Uuid> = {
            let mut pending = self.pending.lock();
            pending.drain(..).collect()
        };
        for order_id in &drained {
            if let Err(e) = self.substrate.remove(order_id).await {
                error!(%order_id, error = %e, "failed to remove drained job");
            }
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "drained waiting jobs");
        }
        drained.len()
    }

    /// Stop the drain loop; in-flight jobs continue.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait for active jobs to settle, up to `timeout`. Returns whether the
    /// queue went idle in time.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.gauges.active.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Prune terminal records older than their retention window.
    pub async fn sweep_retention(&self) -> Result<usize, EngineError> {
        let now = now_ms();
        let records = self.substrate.scan().await.map_err(substrate_error)?;

        let mut removed = 0;
        for record in records {
            let retention = match record.state {
                JobState::Completed => self.config.completed_retention,
                JobState::Failed => self.config.failed_retention,
                _ => continue,
            };
            let age_ms = now.saturating_sub(record.updated_ms);
            if age_ms > retention.as_millis() as u64 {
                self.substrate
                    .remove(&record.job.order_id)
                    .await
                    .map_err(substrate_error)?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "retention sweep removed terminal jobs");
        }
        Ok(removed)
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            waiting: self.pending.lock().len() as u64,
            active: self.gauges.active.load(Ordering::SeqCst),
            delayed: self.gauges.delayed.load(Ordering::SeqCst),
            completed: self.gauges.completed.load(Ordering::SeqCst),
            failed: self.gauges.failed.load(Ordering::SeqCst),
        }
    }
}

fn substrate_error(e: anyhow::Error) -> EngineError {
    EngineError::system(format!("queue substrate failure: {e}"))
        .with_context("component", "work_queue")
}

//! At-least-once job queue feeding the message worker pool.
//!
//! Ingestion enqueues, workers pull and invoke the registered handler. A
//! failing job is re-enqueued with exponential backoff until its attempt
//! budget is spent, then moved to the dead-letter store for manual
//! inspection. Jobs are independent units of work: one failure never blocks
//! or corrupts another, and backoff waits never occupy a worker slot.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Retry budget and backoff shape for one queue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first delivery included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (1-based) attempt is retried, with jitter so
    /// bursts of failures do not retry in lockstep.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        let capped = base.min(self.max_delay);
        let jitter_ms = rand::rng().random_range(0..=capped.as_millis().max(1) as u64 / 4);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// A payload wrapped with queue bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedJob<J> {
    pub id: Uuid,
    /// 1-based attempt counter.
    pub attempt: u32,
    pub payload: J,
}

/// Work processor registered with [`JobQueue::start_workers`].
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    async fn handle(&self, job: &QueuedJob<J>) -> Result<()>;
}

/// Terminal record of a job that exhausted its attempts.
#[derive(Debug, Clone)]
pub struct DeadJob<J> {
    pub job: QueuedJob<J>,
    pub error: String,
    pub failed_at: OffsetDateTime,
}

/// Snapshot of queue depth for health probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub failed: usize,
}

struct Shared<J> {
    tx: mpsc::Sender<QueuedJob<J>>,
    waiting: AtomicUsize,
    active: AtomicUsize,
    failed: AtomicUsize,
    policy: RetryPolicy,
    dead: Mutex<Vec<DeadJob<J>>>,
}

pub struct JobQueue<J> {
    shared: Arc<Shared<J>>,
    rx: Mutex<Option<mpsc::Receiver<QueuedJob<J>>>>,
}

impl<J> JobQueue<J>
where
    J: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                tx,
                waiting: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                policy,
                dead: Mutex::new(Vec::new()),
            }),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueues a fresh job (attempt 1). Waits when the channel is at
    /// capacity rather than dropping work.
    pub async fn enqueue(&self, payload: J) -> Result<Uuid> {
        let job = QueuedJob {
            id: Uuid::new_v4(),
            attempt: 1,
            payload,
        };
        let id = job.id;
        self.shared.waiting.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.shared.tx.send(job).await {
            self.shared.waiting.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("queue closed: {err}");
        }
        Ok(id)
    }

    /// Spawns `count` workers draining the queue with `handler`.
    ///
    /// Callable once; later calls find the receiver gone and are a no-op.
    pub async fn start_workers(&self, count: usize, handler: Arc<dyn JobHandler<J>>) {
        let Some(rx) = self.rx.lock().await.take() else {
            warn!("workers already started");
            return;
        };
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..count.max(1) {
            let rx = rx.clone();
            let shared = self.shared.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                worker_loop(worker, rx, shared, handler).await;
            });
        }
    }

    /// Whether a job could be enqueued/dequeued right now.
    pub fn is_ready(&self) -> bool {
        !self.shared.tx.is_closed()
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.shared.waiting.load(Ordering::SeqCst),
            active: self.shared.active.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Dead-lettered jobs, oldest first. Never replayed automatically.
    pub async fn dead_letters(&self) -> Vec<DeadJob<J>> {
        self.shared.dead.lock().await.clone()
    }
}

async fn worker_loop<J>(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob<J>>>>,
    shared: Arc<Shared<J>>,
    handler: Arc<dyn JobHandler<J>>,
) where
    J: Clone + Send + Sync + 'static,
{
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            break;
        };

        shared.waiting.fetch_sub(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);

        // Run the handler on its own task so a panic is contained to this
        // job and reported like any other failure.
        let task_job = job.clone();
        let task_handler = handler.clone();
        let outcome =
            tokio::spawn(async move { task_handler.handle(&task_job).await }).await;

        shared.active.fetch_sub(1, Ordering::SeqCst);

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(join_err) => Some(format!("job task aborted: {join_err}")),
        };

        let Some(reason) = failure else {
            continue;
        };

        if job.attempt >= shared.policy.max_attempts {
            error!(
                worker,
                job_id = %job.id,
                attempts = job.attempt,
                error = %reason,
                "job exhausted retry budget; dead-lettering"
            );
            shared.failed.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("jobs_dead_lettered").increment(1);
            shared.dead.lock().await.push(DeadJob {
                job,
                error: reason,
                failed_at: OffsetDateTime::now_utc(),
            });
            continue;
        }

        let delay = shared.policy.backoff(job.attempt);
        warn!(
            worker,
            job_id = %job.id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "job failed; scheduling retry"
        );
        metrics::counter!("jobs_retried").increment(1);
        let retry = QueuedJob {
            id: job.id,
            attempt: job.attempt + 1,
            payload: job.payload,
        };
        let shared_retry = shared.clone();
        // The wait happens off-worker so slow retries never occupy a slot.
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared_retry.waiting.fetch_add(1, Ordering::SeqCst);
            if shared_retry.tx.send(retry).await.is_err() {
                shared_retry.waiting.fetch_sub(1, Ordering::SeqCst);
                info!("queue closed while retrying; dropping job");
            }
        });
    }
}

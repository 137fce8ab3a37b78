//! Priority task queue
//!
//! Three unbounded channels (high, default, low) feed a single dispatch loop
//! that always drains higher classes first. A semaphore bounds how many
//! tasks run at once. Failed tasks are retried with backoff while their
//! error is retryable and attempts remain, otherwise they are handed back to
//! the handler to clean up.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::task::{backoff_delay, Priority, Task};
use crate::error::{PipelineError, PipelineResult};

/// Anything that can accept work for later
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Executes tasks pulled off the queue
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task; returned tasks are scheduled as follow-ups
    async fn execute(&self, task: &Task) -> PipelineResult<Vec<Task>>;

    /// Called once when a task fails for good
    async fn abandon(&self, task: &Task, error: &PipelineError);
}

/// When the dispatch loop returns
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Once nothing is queued, running or waiting to be retried
    UntilIdle,
    /// When the token is cancelled; in-flight tasks are awaited
    UntilCancelled(CancellationToken),
}

#[derive(Debug)]
struct Envelope {
    task: Task,
    attempt: u32,
}

/// Cloneable sending side of the queue
#[derive(Clone)]
pub struct QueueHandle {
    high: mpsc::UnboundedSender<Envelope>,
    default: mpsc::UnboundedSender<Envelope>,
    low: mpsc::UnboundedSender<Envelope>,
    /// Tasks scheduled but not yet finished (queued, running or backing off)
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl QueueHandle {
    fn send(&self, envelope: Envelope) {
        let sender = match envelope.task.priority() {
            Priority::High => &self.high,
            Priority::Default => &self.default,
            Priority::Low => &self.low,
        };
        if let Err(mpsc::error::SendError(envelope)) = sender.send(envelope) {
            warn!("Queue closed, dropping {}", envelope.task);
            self.finish_one();
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Number of tasks not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Re-send after `delay` without releasing the pending count
    fn retry_later(&self, envelope: Envelope, delay: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.send(envelope);
        });
    }
}

impl Scheduler for QueueHandle {
    fn schedule(&self, task: Task) {
        debug!("Scheduling {}", task);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.send(Envelope { task, attempt: 1 });
    }
}

/// Receiving side of the queue, driven by [`QueueRunner::run`]
pub struct QueueRunner {
    handle: QueueHandle,
    high: mpsc::UnboundedReceiver<Envelope>,
    default: mpsc::UnboundedReceiver<Envelope>,
    low: mpsc::UnboundedReceiver<Envelope>,
    concurrency: usize,
    retry_base: Duration,
}

pub struct TaskQueue;

impl TaskQueue {
    pub fn new(concurrency: usize, retry_base: Duration) -> (QueueHandle, QueueRunner) {
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (default_tx, default_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();

        let handle = QueueHandle {
            high: high_tx,
            default: default_tx,
            low: low_tx,
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        };
        let runner = QueueRunner {
            handle: handle.clone(),
            high: high_rx,
            default: default_rx,
            low: low_rx,
            concurrency: concurrency.max(1),
            retry_base,
        };
        (handle, runner)
    }
}

impl QueueRunner {
    pub async fn run(&mut self, handler: Arc<dyn TaskHandler>, mode: RunMode) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let cancel = match &mode {
            RunMode::UntilCancelled(token) => token.clone(),
            RunMode::UntilIdle => CancellationToken::new(),
        };
        let until_idle = matches!(mode, RunMode::UntilIdle);
        info!("Task queue running with {} workers", self.concurrency);

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let envelope = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(envelope) = self.high.recv() => envelope,
                Some(envelope) = self.default.recv() => envelope,
                Some(envelope) = self.low.recv() => envelope,
                _ = self.handle.wait_idle(), if until_idle => break,
            };

            let handler = handler.clone();
            let handle = self.handle.clone();
            let retry_base = self.retry_base;
            tokio::spawn(async move {
                process(handler, &handle, envelope, retry_base).await;
                drop(permit);
            });
        }

        // Let in-flight tasks finish before returning
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("Task queue stopped");
    }
}

async fn process(handler: Arc<dyn TaskHandler>, handle: &QueueHandle, envelope: Envelope, retry_base: Duration) {
    let Envelope { task, attempt } = envelope;
    debug!(attempt, "Running {}", task);

    let result = match AssertUnwindSafe(handler.execute(&task)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Logic(format!("{task} panicked"))),
    };

    match result {
        Ok(follow_ups) => {
            for next in follow_ups {
                handle.schedule(next);
            }
        }
        Err(e) if e.is_retryable() && task.retry_policy().allows_retry(attempt) => {
            let policy = task.retry_policy();
            let delay = backoff_delay(retry_base, attempt, policy.max_delay);
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                "{} failed, retrying in {:?}: {}",
                task,
                delay,
                e
            );
            handle.retry_later(Envelope { task, attempt: attempt + 1 }, delay);
            return;
        }
        Err(e) => {
            match &e {
                PipelineError::NotFound { .. } => debug!("{} gave up: {}", task, e),
                PipelineError::Upstream { .. }
                | PipelineError::Rejected { .. }
                | PipelineError::InvalidGenerationResponse(_) => {
                    warn!(attempt, "{} gave up: {}", task, e)
                }
                PipelineError::Logic(_) | PipelineError::Store(_) => {
                    error!(attempt, "{} failed: {}", task, e)
                }
            }
            handler.abandon(&task, &e).await;
        }
    }

    handle.finish_one();
}

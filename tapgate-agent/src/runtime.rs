use std::future::IntoFuture;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TrySendError};
use futures_util::FutureExt;
use tapgate_common::{
    DEFAULT_CONCURRENCY_LIMIT, DEFAULT_QUEUE_SIZE, DEFAULT_WORKERS, DispatchMetrics, ReplyLine,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, ExecutionError};
use crate::executors::DeviceExecutor;
use crate::model::{ActionKind, Command};

/// How long a request waits for its worker before answering `<kind> enqueued`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Deadlines {
    pub tap: Duration,
    pub swipe: Duration,
    pub key: Duration,
    pub text: Duration,
}

impl Deadlines {
    /// Deadline for one action kind.
    pub fn for_kind(&self, kind: ActionKind) -> Duration {
        match kind {
            ActionKind::Tap => self.tap,
            ActionKind::Swipe => self.swipe,
            ActionKind::Key => self.key,
            ActionKind::Text => self.text,
        }
    }
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            tap: Duration::from_millis(150),
            swipe: Duration::from_millis(200),
            key: Duration::from_millis(150),
            text: Duration::from_millis(150),
        }
    }
}

/// Per-call bounds handed to the device executor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionTimeouts {
    /// Bound for touch, swipe and key calls.
    pub input: Duration,
    /// Bound for text injection.
    pub text: Duration,
}

impl Default for ExecutionTimeouts {
    fn default() -> Self {
        Self {
            input: Duration::from_secs(3),
            text: Duration::from_secs(5),
        }
    }
}

/// Sizing and timing for a [`Dispatcher`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DispatchConfig {
    /// Number of worker tasks, at least one.
    pub workers: usize,
    /// Capacity of the action queue, at least one.
    pub queue_size: usize,
    /// Number of requests that may be handled at once.
    pub concurrency_limit: usize,
    pub deadlines: Deadlines,
    pub timeouts: ExecutionTimeouts,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            deadlines: Deadlines::default(),
            timeouts: ExecutionTimeouts::default(),
        }
    }
}

/// Result of racing an operation against a deadline.
#[derive(Debug, Eq, PartialEq)]
pub enum Raced<T> {
    /// The operation finished first.
    Finished(T),
    /// The deadline elapsed first. The operation was dropped, not cancelled
    /// at its source.
    DeadlineElapsed,
}

/// Waits for the first of `operation` and `deadline`.
pub async fn race_deadline<F>(deadline: Duration, operation: F) -> Raced<F::Output>
where
    F: IntoFuture,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(output) => Raced::Finished(output),
        Err(_) => Raced::DeadlineElapsed,
    }
}

/// Outcome of a worker's delivery attempt into a [`ReplySlot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// The reader was still waiting, or can still read the value.
    Delivered,
    /// The reader had already given up; the value was dropped.
    Discarded,
    /// A value was written earlier; nothing happened.
    AlreadyCompleted,
}

/// Write side of an action's single-use reply channel.
///
/// Completing never blocks and at most one completion takes effect.
#[derive(Debug)]
pub struct ReplySlot {
    sender: Option<oneshot::Sender<ReplyLine>>,
}

impl ReplySlot {
    fn channel(action_id: u64, kind: ActionKind) -> (Self, PendingReply) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            PendingReply {
                action_id,
                kind,
                receiver,
            },
        )
    }

    /// Attempts to hand `line` to the waiting request.
    pub fn complete(&mut self, line: ReplyLine) -> Delivery {
        let Some(sender) = self.sender.take() else {
            return Delivery::AlreadyCompleted;
        };
        match sender.send(line) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Discarded,
        }
    }
}

/// Read side of an action's reply channel, held by the request handler.
#[derive(Debug)]
pub struct PendingReply {
    action_id: u64,
    kind: ActionKind,
    receiver: oneshot::Receiver<ReplyLine>,
}

impl PendingReply {
    /// Sequence id of the queued action.
    pub fn action_id(&self) -> u64 {
        self.action_id
    }

    /// Waits up to `deadline` for the worker's result.
    ///
    /// On timeout the action keeps running; its result will be discarded.
    pub async fn wait(self, deadline: Duration) -> Submission {
        match race_deadline(deadline, self.receiver).await {
            Raced::Finished(Ok(line)) => Submission::Completed(line),
            Raced::Finished(Err(_)) => {
                Submission::Completed(ReplyLine::error("action dropped before completion"))
            }
            Raced::DeadlineElapsed => Submission::Accepted(self.kind),
        }
    }
}

/// What a request learned about its action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Submission {
    /// The worker finished within the deadline.
    Completed(ReplyLine),
    /// The deadline elapsed; the action is still running or queued.
    Accepted(ActionKind),
}

impl Submission {
    /// Body line returned to the caller.
    pub fn reply_line(&self) -> ReplyLine {
        match self {
            Self::Completed(line) => line.clone(),
            Self::Accepted(kind) => ReplyLine::ok(kind.enqueued_message()),
        }
    }
}

/// Admission slot held for the whole handling of one request.
///
/// Dropping the permit returns the slot, on every exit path.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// A queued unit of work.
struct Action {
    id: u64,
    command: Command,
    reply: ReplySlot,
    enqueued_at: Instant,
}

/// Lock-free dispatcher counters.
#[derive(Debug, Default)]
pub struct Observability {
    pub admitted: AtomicU64,
    pub rejected_busy: AtomicU64,
    pub rejected_queue_full: AtomicU64,
    pub rejected_invalid: AtomicU64,
    pub enqueued: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub delivered: AtomicU64,
    pub discarded: AtomicU64,
    pub acknowledged: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Owns the action queue, the worker pool and the admission permit pool.
///
/// One instance is built at startup and shared by every request handler.
/// Workers pull from a single queue, so actions taken by different workers
/// may complete in any order; only each worker's own stream is FIFO.
pub struct Dispatcher {
    queue: Sender<Action>,
    permits: Arc<Semaphore>,
    deadlines: Deadlines,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    observability: Arc<Observability>,
    next_action_id: AtomicU64,
}

impl Dispatcher {
    /// Spawns the worker pool on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(config: DispatchConfig, executor: Arc<dyn DeviceExecutor>) -> Self {
        let worker_count = config.workers.max(1);
        let (sender, receiver) = async_channel::bounded(config.queue_size.max(1));
        let concurrency_limit = config.concurrency_limit.min(Semaphore::MAX_PERMITS);
        let observability = Arc::new(Observability::default());

        let workers = (0..worker_count)
            .map(|index| {
                let worker = Worker {
                    index,
                    receiver: receiver.clone(),
                    executor: Arc::clone(&executor),
                    timeouts: config.timeouts,
                    observability: Arc::clone(&observability),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = worker_count,
            queue_size = config.queue_size.max(1),
            concurrency_limit,
            "dispatcher started"
        );

        Self {
            queue: sender,
            permits: Arc::new(Semaphore::new(concurrency_limit)),
            deadlines: config.deadlines,
            worker_count,
            workers: Mutex::new(workers),
            observability,
            next_action_id: AtomicU64::new(1),
        }
    }

    /// Takes an admission permit without waiting.
    pub fn try_admit(&self) -> Result<AdmissionPermit, DispatchError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                bump(&self.observability.admitted);
                Ok(AdmissionPermit { _permit: permit })
            }
            Err(TryAcquireError::NoPermits) => {
                bump(&self.observability.rejected_busy);
                debug!("admission rejected: no free permits");
                Err(DispatchError::Busy)
            }
            Err(TryAcquireError::Closed) => Err(DispatchError::Closed),
        }
    }

    /// Queues `command` without waiting for space.
    pub fn try_enqueue(&self, command: Command) -> Result<PendingReply, DispatchError> {
        let id = self.next_action_id.fetch_add(1, Ordering::Relaxed);
        let kind = command.kind();
        let (reply, pending) = ReplySlot::channel(id, kind);
        let action = Action {
            id,
            command,
            reply,
            enqueued_at: Instant::now(),
        };

        match self.queue.try_send(action) {
            Ok(()) => {
                bump(&self.observability.enqueued);
                debug!(action_id = id, %kind, "action queued");
                Ok(pending)
            }
            Err(TrySendError::Full(_)) => {
                bump(&self.observability.rejected_queue_full);
                debug!(action_id = id, %kind, "action rejected: queue full");
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Queues `command` and races its result against the kind's deadline.
    pub async fn submit(&self, command: Command) -> Result<Submission, DispatchError> {
        let deadline = self.deadlines.for_kind(command.kind());
        let pending = self.try_enqueue(command)?;
        let action_id = pending.action_id();
        let submission = pending.wait(deadline).await;
        if let Submission::Accepted(kind) = submission {
            bump(&self.observability.acknowledged);
            debug!(
                action_id,
                %kind,
                deadline_ms = deadline.as_millis() as u64,
                "deadline elapsed; acknowledged"
            );
        }
        Ok(submission)
    }

    /// Counts a request whose body failed validation.
    pub fn record_invalid(&self) {
        bump(&self.observability.rejected_invalid);
    }

    /// Current deadlines.
    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    /// Snapshot of counters and resource usage.
    pub fn metrics(&self) -> DispatchMetrics {
        let counters = &self.observability;
        DispatchMetrics {
            admitted: read(&counters.admitted),
            rejected_busy: read(&counters.rejected_busy),
            rejected_queue_full: read(&counters.rejected_queue_full),
            rejected_invalid: read(&counters.rejected_invalid),
            enqueued: read(&counters.enqueued),
            succeeded: read(&counters.succeeded),
            failed: read(&counters.failed),
            delivered: read(&counters.delivered),
            discarded: read(&counters.discarded),
            acknowledged: read(&counters.acknowledged),
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity().unwrap_or_default(),
            available_permits: self.permits.available_permits(),
            workers: self.worker_count,
        }
    }

    /// Stops accepting actions. Workers drain what is queued, then exit.
    pub fn shutdown(&self) {
        if self.queue.close() {
            info!("dispatcher queue closed");
        }
    }

    /// Closes the queue and waits for every worker to exit.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "worker task ended abnormally");
            }
        }
    }
}

struct Worker {
    index: usize,
    receiver: Receiver<Action>,
    executor: Arc<dyn DeviceExecutor>,
    timeouts: ExecutionTimeouts,
    observability: Arc<Observability>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.index, "worker started");
        while let Ok(mut action) = self.receiver.recv().await {
            let line = self.execute(&action).await;
            match action.reply.complete(line) {
                Delivery::Delivered => {
                    bump(&self.observability.delivered);
                    debug!(action_id = action.id, "result delivered");
                }
                Delivery::Discarded => {
                    bump(&self.observability.discarded);
                    debug!(action_id = action.id, "result discarded; caller already answered");
                }
                Delivery::AlreadyCompleted => {}
            }
        }
        debug!(worker = self.index, "worker stopped");
    }

    async fn execute(&self, action: &Action) -> ReplyLine {
        let kind = action.command.kind();
        debug!(
            worker = self.index,
            action_id = action.id,
            %kind,
            queued_ms = action.enqueued_at.elapsed().as_millis() as u64,
            "executing action"
        );

        let outcome = AssertUnwindSafe(perform(
            self.executor.as_ref(),
            &action.command,
            self.timeouts,
        ))
        .catch_unwind()
        .await
        .unwrap_or(Err(ExecutionError::Panicked));

        match outcome {
            Ok(()) => {
                bump(&self.observability.succeeded);
                ReplyLine::ok(action.command.success_line())
            }
            Err(error) => {
                bump(&self.observability.failed);
                warn!(action_id = action.id, %kind, %error, "action failed");
                ReplyLine::error(format!("executing command failed: {error}"))
            }
        }
    }
}

/// Runs every repetition of `command` in order, pausing between them.
/// The first failure aborts the remaining repetitions.
async fn perform(
    executor: &dyn DeviceExecutor,
    command: &Command,
    timeouts: ExecutionTimeouts,
) -> Result<(), ExecutionError> {
    let repeat = command.repeat();
    for iteration in 0..repeat.amount {
        if iteration > 0 && repeat.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(repeat.delay_ms)).await;
        }
        match command {
            Command::Tap(tap) => executor.touch(tap.at, timeouts.input).await?,
            Command::Swipe(swipe) => {
                executor
                    .swipe(swipe.from, swipe.to, swipe.duration_ms, timeouts.input)
                    .await?
            }
            Command::Key(key) => executor.key(&key.keycode, timeouts.input).await?,
            Command::Text(text) => executor.text(&text.payload, timeouts.text).await?,
        }
    }
    Ok(())
}

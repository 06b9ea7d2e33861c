use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::error::{JobError, Result};
use crate::scheduler::job::{Job, JobId, JobOutput, JobStatus};
use crate::scheduler::queue::{JobQueue, OutcomeSlot, QueuedJob};
use crate::scheduler::registry::{JobHandler, KindRegistry};

/// Eventual outcome of a submitted job. Resolves exactly once.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<Result<JobOutput>>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }
}

impl Future for JobHandle {
    type Output = Result<JobOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(JobError::Internal("job dropped without an outcome".into())))
        })
    }
}

/// Queue plus in-flight marker. Both live under one mutex; the lock is never
/// held across an await.
#[derive(Debug)]
struct DispatchState {
    queue: JobQueue,
    in_flight: Option<JobId>,
    accepting: bool,
}

struct Inner {
    registry: KindRegistry,
    state: Mutex<DispatchState>,
    wake: Notify,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collects job kind handlers before the dispatcher starts.
#[derive(Debug, Default)]
pub struct JobManagerBuilder {
    registry: KindRegistry,
    capacity: Option<usize>,
}

impl JobManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Result<Self> {
        self.registry.register(handler)?;
        Ok(self)
    }

    pub fn register_all(
        mut self,
        handlers: impl IntoIterator<Item = Arc<dyn JobHandler>>,
    ) -> Result<Self> {
        for handler in handlers {
            self.registry.register(handler)?;
        }
        Ok(self)
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn build(self) -> JobManager {
        let queue = match self.capacity {
            Some(cap) => JobQueue::with_capacity(cap),
            None => JobQueue::new(),
        };
        let inner = Arc::new(Inner {
            registry: self.registry,
            state: Mutex::new(DispatchState {
                queue,
                in_flight: None,
                accepting: true,
            }),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        });

        let worker_inner = inner.clone();
        let worker = tokio::spawn(async move {
            JobManager::worker_loop(worker_inner).await;
        });
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);

        tracing::info!(kinds = ?inner.registry.kinds(), "Job manager started");
        let stop_on_drop = Arc::new(inner.shutdown.clone().drop_guard());
        JobManager {
            inner,
            _stop_on_drop: stop_on_drop,
        }
    }
}

/// Serialized dispatcher: jobs run one at a time, in submission order.
///
/// Dropping the last clone stops the worker the same way
/// [`shutdown`](Self::shutdown) does, without waiting for it.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
    _stop_on_drop: Arc<DropGuard>,
}

impl JobManager {
    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::new()
    }

    /// Queue a job and return a handle to its outcome. Never blocks.
    ///
    /// Unregistered kinds, a full queue and a stopped manager resolve the
    /// handle with an error immediately, without touching the queue.
    pub fn submit(&self, job: Job) -> JobHandle {
        let id = job.id.clone();
        let (slot, rx) = OutcomeSlot::new();
        self.enqueue(job, slot);
        JobHandle { id, rx }
    }

    /// Callback form of [`submit`](Self::submit): exactly one of the two
    /// callbacks runs, once. For queued jobs it runs on the worker before
    /// the next job starts, so callbacks fire in submission order.
    /// Rejected jobs get `on_failure` on the caller's thread.
    pub fn add<S, F>(&self, job: Job, on_success: S, on_failure: F)
    where
        S: FnOnce(JobOutput) + Send + 'static,
        F: FnOnce(JobError) + Send + 'static,
    {
        let slot = OutcomeSlot::callback(move |outcome| match outcome {
            Ok(output) => on_success(output),
            Err(err) => on_failure(err),
        });
        self.enqueue(job, slot);
    }

    fn enqueue(&self, job: Job, slot: OutcomeSlot) {
        let id = job.id.clone();
        let kind = job.kind();

        if !self.inner.registry.contains(kind) {
            tracing::error!(job_id = %id, kind = %kind, "No handler for job kind");
            slot.resolve(Err(JobError::UnregisteredKind(kind)));
            return;
        }

        let rejected = {
            let mut state = self.inner.state();
            if !state.accepting {
                Some((slot, JobError::ShuttingDown))
            } else {
                match state.queue.push(QueuedJob { job, slot }) {
                    Ok(()) => {
                        tracing::debug!(
                            job_id = %id,
                            kind = %kind,
                            status = %JobStatus::Pending,
                            pending = state.queue.len(),
                            "Job queued"
                        );
                        None
                    }
                    Err(entry) => {
                        let capacity = state.queue.capacity();
                        tracing::warn!(job_id = %id, capacity, "Job queue at capacity, job rejected");
                        Some((entry.slot, JobError::QueueFull(capacity)))
                    }
                }
            }
        };

        match rejected {
            Some((slot, err)) => slot.resolve(Err(err)),
            None => self.inner.wake.notify_one(),
        }
    }

    /// Number of jobs waiting behind the one in flight
    pub fn pending(&self) -> usize {
        self.inner.state().queue.len()
    }

    pub fn in_flight(&self) -> Option<JobId> {
        self.inner.state().in_flight.clone()
    }

    /// Stop accepting jobs, let the running job finish, and fail everything
    /// still queued with [`JobError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.inner.state().accepting = false;
        self.inner.shutdown.cancel();

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Job worker ended abnormally");
            }
        }
    }

    /// Single consumer of the queue. Sleeps on `wake` while the queue is empty.
    async fn worker_loop(inner: Arc<Inner>) {
        loop {
            if inner.shutdown.is_cancelled() {
                break;
            }

            let next = {
                let mut state = inner.state();
                let next = state.queue.pop();
                state.in_flight = next.as_ref().map(|e| e.job.id.clone());
                next
            };

            match next {
                Some(entry) => {
                    Self::run_job(&inner.registry, entry).await;
                    inner.state().in_flight = None;
                }
                None => {
                    tokio::select! {
                        _ = inner.wake.notified() => {}
                        _ = inner.shutdown.cancelled() => {}
                    }
                }
            }
        }

        let abandoned = inner.state().queue.drain();
        if !abandoned.is_empty() {
            tracing::info!(count = abandoned.len(), "Failing queued jobs on shutdown");
        }
        for entry in abandoned {
            entry.slot.resolve(Err(JobError::ShuttingDown));
        }
        tracing::info!("Job worker stopped");
    }

    async fn run_job(registry: &KindRegistry, entry: QueuedJob) {
        let QueuedJob { job, slot } = entry;
        let id = job.id.clone();
        let kind = job.kind();
        let span = tracing::info_span!(
            "job",
            job_id = %id,
            kind = %kind,
            owner = %job.owner,
            process = kind.spawns_process()
        );

        let Some(handler) = registry.get(kind) else {
            slot.resolve(Err(JobError::UnregisteredKind(kind)));
            return;
        };

        span.in_scope(|| {
            tracing::info!(
                status = %JobStatus::Running,
                waited_ms = (chrono::Utc::now() - job.created_at).num_milliseconds(),
                "Executing job"
            )
        });
        let started = Instant::now();

        // Run on its own task so a panicking handler can't take the worker down.
        let task = tokio::spawn(async move { handler.execute(&job).await }.instrument(span.clone()));
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(JobError::Internal("job handler panicked".into())),
            Err(e) => Err(JobError::Internal(e.to_string())),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| match &outcome {
            Ok(_) => tracing::info!(status = %JobStatus::Completed, elapsed_ms, "Job completed"),
            Err(e) => tracing::warn!(
                status = %JobStatus::Failed,
                elapsed_ms,
                timeout = e.is_timeout(),
                error = %e,
                "Job failed"
            ),
        });

        slot.resolve(outcome);
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("registry", &self.inner.registry)
            .field("state", &*self.inner.state())
            .finish()
    }
}

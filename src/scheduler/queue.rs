use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tokio::sync::oneshot;

use crate::error::Result;
use crate::scheduler::job::{Job, JobId, JobOutput};

const DEFAULT_MAX_JOBS: usize = 10_000;

type Callback = Box<dyn FnOnce(Result<JobOutput>) + Send + 'static>;

/// Write-once completion slot for a queued job. Resolving consumes it, so a
/// job's outcome can only ever be delivered once.
pub enum OutcomeSlot {
    /// Outcome goes to a [`JobHandle`](crate::scheduler::JobHandle).
    Channel(oneshot::Sender<Result<JobOutput>>),
    /// Outcome is handed to a callback, run on the worker before it moves
    /// on to the next job.
    Callback(Callback),
}

impl OutcomeSlot {
    pub fn new() -> (Self, oneshot::Receiver<Result<JobOutput>>) {
        let (tx, rx) = oneshot::channel();
        (OutcomeSlot::Channel(tx), rx)
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Result<JobOutput>) + Send + 'static,
    {
        OutcomeSlot::Callback(Box::new(f))
    }

    pub fn resolve(self, outcome: Result<JobOutput>) {
        match self {
            OutcomeSlot::Channel(tx) => {
                if tx.send(outcome).is_err() {
                    tracing::debug!("Job outcome dropped, submitter is gone");
                }
            }
            OutcomeSlot::Callback(f) => {
                if panic::catch_unwind(AssertUnwindSafe(|| f(outcome))).is_err() {
                    tracing::error!("Job completion callback panicked");
                }
            }
        }
    }
}

impl fmt::Debug for OutcomeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeSlot::Channel(_) => f.write_str("OutcomeSlot::Channel"),
            OutcomeSlot::Callback(_) => f.write_str("OutcomeSlot::Callback"),
        }
    }
}

/// A job waiting for the dispatcher together with its completion slot.
#[derive(Debug)]
pub struct QueuedJob {
    pub job: Job,
    pub slot: OutcomeSlot,
}

/// FIFO of jobs waiting for execution.
#[derive(Debug)]
pub struct JobQueue {
    jobs: VecDeque<QueuedJob>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_jobs,
        }
    }

    /// Append a job at the tail. Hands the entry back if the queue is full.
    pub fn push(&mut self, entry: QueuedJob) -> std::result::Result<(), QueuedJob> {
        if self.is_full() {
            return Err(entry);
        }
        self.jobs.push_back(entry);
        Ok(())
    }

    /// Take the oldest job.
    pub fn pop(&mut self) -> Option<QueuedJob> {
        self.jobs.pop_front()
    }

    /// Ids of waiting jobs in execution order
    pub fn pending_ids(&self) -> Vec<&JobId> {
        self.jobs.iter().map(|e| &e.job.id).collect()
    }

    /// Remove every waiting job, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedJob> {
        self.jobs.drain(..).collect()
    }

    pub fn capacity(&self) -> usize {
        self.max_jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{FileRequest, JobData};

    fn entry(name: &str) -> (QueuedJob, oneshot::Receiver<Result<JobOutput>>) {
        let job = Job::new(
            "alice",
            JobData::Read(FileRequest {
                cate: "src".into(),
                name: name.into(),
                content: None,
            }),
        );
        let (slot, rx) = OutcomeSlot::new();
        (QueuedJob { job, slot }, rx)
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = JobQueue::new();
        let (a, _ra) = entry("A");
        let (b, _rb) = entry("B");
        let (c, _rc) = entry("C");
        let ids = vec![a.job.id.clone(), b.job.id.clone(), c.job.id.clone()];

        queue.push(a).unwrap();
        queue.push(b).unwrap();
        queue.push(c).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.pending_ids().into_iter().cloned().collect::<Vec<_>>(),
            ids
        );

        let popped: Vec<JobId> = std::iter::from_fn(|| queue.pop().map(|e| e.job.id)).collect();
        assert_eq!(popped, ids);
        assert!(queue.is_empty());
    }

    #[test]
    fn push_rejects_when_full() {
        let mut queue = JobQueue::with_capacity(1);
        let (a, _ra) = entry("A");
        let (b, _rb) = entry("B");
        let b_id = b.job.id.clone();

        assert!(queue.push(a).is_ok());
        assert!(queue.is_full());
        let rejected = queue.push(b).unwrap_err();
        assert_eq!(rejected.job.id, b_id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn duplicates_are_kept() {
        let mut queue = JobQueue::new();
        let (a, _ra) = entry("A");
        let (a2, _ra2) = entry("A");
        queue.push(a).unwrap();
        queue.push(a2).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn slot_resolves_once() {
        let (slot, rx) = OutcomeSlot::new();
        slot.resolve(Ok(JobOutput::Data(serde_json::json!({ "ok": true }))));
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.as_data().unwrap()["ok"], true);
    }

    #[test]
    fn callback_slot_runs_inline() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        let slot = OutcomeSlot::callback(move |outcome| {
            *sink.lock().unwrap() = Some(outcome.is_err());
        });
        slot.resolve(Err(crate::error::JobError::ShuttingDown));
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let slot = OutcomeSlot::callback(|_| panic!("callback blew up"));
        slot.resolve(Err(crate::error::JobError::ShuttingDown));
    }

    #[test]
    fn drain_empties_in_order() {
        let mut queue = JobQueue::new();
        let (a, _ra) = entry("A");
        let (b, _rb) = entry("B");
        let first = a.job.id.clone();
        queue.push(a).unwrap();
        queue.push(b).unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].job.id, first);
        assert!(queue.is_empty());
    }
}

//! Job model and the serialized dispatcher.
//!
//! - [`Job`]: immutable unit of work with a kind-specific payload and TTL
//! - [`JobQueue`]: FIFO of waiting jobs with write-once outcome slots
//! - [`KindRegistry`]: explicit mapping from [`JobKind`] to [`JobHandler`]
//! - [`JobManager`]: single worker that runs queued jobs one at a time, in
//!   submission order, and delivers each outcome exactly once

pub mod job;
pub mod manager;
pub mod queue;
pub mod registry;

pub use job::{
    CompileRequest, FileRequest, Job, JobData, JobId, JobKind, JobOutput, JobSpec, JobStatus,
    Locator, LogPaths, ProcessResult, PubTarget, ResultType, SimulateRequest, UserPatch,
};
pub use manager::{JobHandle, JobManager, JobManagerBuilder};
pub use queue::JobQueue;
pub use registry::{JobHandler, KindRegistry};

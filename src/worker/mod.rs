//! Supervised external process execution.
//!
//! - [`ProcessRunner`]: spawns one process per invocation, captures stdout and
//!   stderr incrementally, and produces a single [`ProcessReport`]
//! - [`Killer`]: TTL timer that forces termination of an overrunning process
//!
//! # Invocation lifecycle
//!
//! `Spawning -> Running -> {ExitedNormally, KilledOnTimeout}`
//!
//! A spawn failure is returned as `JobError::Spawn` and has no invocation.
//!
//! After a timeout kill the runner waits at most `kill_grace` for the exit
//! event, then completes regardless. Output readers get `drain_grace` after
//! termination before they are abandoned.

pub mod executor;
pub mod killer;

pub use executor::{
    Invocation, InvocationState, OutputChunk, ProcessReport, ProcessRunner, ProcessSpec, Stream,
    Termination,
};
pub use killer::Killer;

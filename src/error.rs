use std::time::Duration;

use thiserror::Error;

use crate::scheduler::JobKind;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid job input: {0}")]
    Validation(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Exit with {}. Msg:\n{stderr}", display_code(.code))]
    Process { code: Option<i32>, stderr: String },

    #[error("Timed out after {}ms. Msg:\n{stderr}", .ttl.as_millis())]
    Timeout {
        ttl: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No handler registered for job kind {0}")]
    UnregisteredKind(JobKind),

    #[error("Job kind {0} registered twice")]
    DuplicateKind(JobKind),

    #[error("Job queue at capacity ({0} jobs)")]
    QueueFull(usize),

    #[error("Job manager is shutting down")]
    ShuttingDown,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "signal".to_string(),
    }
}

impl JobError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        JobError::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the job ran past its TTL and was killed, as opposed to
    /// running to completion and failing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, JobError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

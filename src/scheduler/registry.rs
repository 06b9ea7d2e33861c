use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{JobError, Result};
use crate::scheduler::job::{Job, JobKind, JobOutput};

/// Execute procedure for one job kind.
///
/// Handlers receive the whole job and must match on the payload variant for
/// their kind; a mismatched payload is a validation failure, not a panic.
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>>;
}

/// Mapping from job kind to its handler. Built once, before the dispatcher
/// starts, and read-only afterwards.
#[derive(Default, Clone)]
pub struct KindRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<()> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(JobError::DuplicateKind(kind));
        }
        tracing::debug!(kind = %kind, "Job kind registered");
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<JobKind> {
        JobKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

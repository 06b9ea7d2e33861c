use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use crate::error::Result;
use crate::jobs::{payload_mismatch, Services};
use crate::scheduler::{Job, JobData, JobHandler, JobKind, JobOutput};

/// Applies a patch to the submitting user's record.
#[derive(Debug, Clone)]
pub struct UserModJob {
    services: Services,
}

impl UserModJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::UserMod(patch) = &job.data else {
            return Err(payload_mismatch(job, "user-mod"));
        };
        self.services.users.modify_user(&job.owner, patch).await?;
        Ok(JobOutput::Data(json!({ "modified": true })))
    }
}

impl JobHandler for UserModJob {
    fn kind(&self) -> JobKind {
        JobKind::UserMod
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

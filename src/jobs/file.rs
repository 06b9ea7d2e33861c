use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use crate::catalog::FileType;
use crate::error::{JobError, Result};
use crate::jobs::{payload_mismatch, Services};
use crate::scheduler::job::is_java_identifier;
use crate::scheduler::{FileRequest, Job, JobData, JobHandler, JobKind, JobOutput};

/// Resolve `<home>/<owner>/<cate>/<name>.java`, rejecting unknown users,
/// unknown categories and names that aren't class names.
async fn source_path(services: &Services, owner: &str, req: &FileRequest) -> Result<PathBuf> {
    let users = &services.users;
    if !users.is_category(&req.cate) {
        return Err(JobError::Validation(format!("unknown category {:?}", req.cate)));
    }
    if !is_java_identifier(&req.name) {
        return Err(JobError::Validation(format!("invalid file name {:?}", req.name)));
    }
    users.get_user(owner).await?;
    Ok(users.source_path(owner, &req.cate, &req.name))
}

#[derive(Debug, Clone)]
pub struct FileReadJob {
    services: Services,
}

impl FileReadJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::Read(req) = &job.data else {
            return Err(payload_mismatch(job, "read"));
        };
        let path = source_path(&self.services, &job.owner, req).await?;
        let content = self.services.files.read_file(&path).await?;
        let is_pub = self
            .services
            .users
            .is_pub(&job.owner, FileType::Class, &req.cate, &req.name)
            .await;
        Ok(JobOutput::Data(json!({ "data": content, "isPub": is_pub })))
    }
}

impl JobHandler for FileReadJob {
    fn kind(&self) -> JobKind {
        JobKind::Read
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

/// Creates or overwrites a source file, then rescans the owner's tree.
#[derive(Debug, Clone)]
pub struct FileStoreJob {
    services: Services,
}

impl FileStoreJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::Store(req) = &job.data else {
            return Err(payload_mismatch(job, "store"));
        };
        let content = req
            .content
            .as_deref()
            .ok_or_else(|| JobError::Validation("store requires fContent".into()))?;
        let path = source_path(&self.services, &job.owner, req).await?;

        self.services.files.write_file(&path, content).await?;
        self.services.users.scan_home(&job.owner).await?;
        tracing::info!(path = %path.display(), bytes = content.len(), "Source stored");
        Ok(JobOutput::Data(json!({ "saved": true, "path": path })))
    }
}

impl JobHandler for FileStoreJob {
    fn kind(&self) -> JobKind {
        JobKind::Store
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

#[derive(Debug, Clone)]
pub struct FileDeleteJob {
    services: Services,
}

impl FileDeleteJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::Delete(req) = &job.data else {
            return Err(payload_mismatch(job, "delete"));
        };
        let path = source_path(&self.services, &job.owner, req).await?;

        self.services.files.delete_file(&path).await?;
        self.services.users.scan_home(&job.owner).await?;
        tracing::info!(path = %path.display(), "Source deleted");
        Ok(JobOutput::Data(json!({ "deleted": true })))
    }
}

impl JobHandler for FileDeleteJob {
    fn kind(&self) -> JobKind {
        JobKind::Delete
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

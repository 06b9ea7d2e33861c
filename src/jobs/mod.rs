//! Concrete job kinds.
//!
//! | kind       | handler          | runs a process |
//! |------------|------------------|----------------|
//! | `read`     | [`FileReadJob`]   | no  |
//! | `store`    | [`FileStoreJob`]  | no  |
//! | `delete`   | [`FileDeleteJob`] | no  |
//! | `user-mod` | [`UserModJob`]    | no  |
//! | `compile`  | [`CompileJob`]    | `javac` |
//! | `simulate` | [`SimulateJob`]   | `java`  |
//!
//! All of them go through the same [`JobManager`](crate::scheduler::JobManager)
//! queue, so mutations of a user tree are globally ordered regardless of kind.

pub mod compile;
pub mod file;
pub mod simulate;
pub mod user;

use std::sync::Arc;

pub use compile::CompileJob;
pub use file::{FileDeleteJob, FileReadJob, FileStoreJob};
pub use simulate::SimulateJob;
pub use user::UserModJob;

use crate::catalog::{FileManager, SimEnvironments, UserManager};
use crate::config::{Config, OutputPolicy, SimConfig};
use crate::error::{JobError, Result};
use crate::scheduler::{Job, JobHandler, JobManager, LogPaths, ProcessResult};
use crate::worker::{ProcessReport, ProcessRunner};

/// Collaborators shared by the job handlers.
#[derive(Debug, Clone)]
pub struct Services {
    pub files: FileManager,
    pub users: Arc<UserManager>,
    pub envs: Arc<SimEnvironments>,
    pub runner: ProcessRunner,
    pub sim: SimConfig,
}

impl Services {
    pub fn new(config: &Config, users: Arc<UserManager>) -> Self {
        Self {
            files: FileManager::new(),
            users,
            envs: Arc::new(SimEnvironments::new(&config.catalog)),
            runner: ProcessRunner::new(config.runner.clone()),
            sim: config.sim.clone(),
        }
    }

    /// Load users from disk and wire up the rest.
    pub async fn load(config: &Config) -> Result<Self> {
        let users = UserManager::load(&config.catalog).await?;
        Ok(Self::new(config, Arc::new(users)))
    }
}

/// One handler per job kind.
pub fn handlers(services: &Services) -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(FileReadJob::new(services.clone())),
        Arc::new(FileStoreJob::new(services.clone())),
        Arc::new(FileDeleteJob::new(services.clone())),
        Arc::new(UserModJob::new(services.clone())),
        Arc::new(CompileJob::new(services.clone())),
        Arc::new(SimulateJob::new(services.clone())),
    ]
}

/// Start a manager with every job kind registered.
pub fn manager(config: &Config, services: &Services) -> Result<JobManager> {
    Ok(JobManager::builder()
        .capacity(config.queue.capacity)
        .register_all(handlers(services))?
        .build())
}

fn payload_mismatch(job: &Job, expected: &str) -> JobError {
    JobError::Validation(format!(
        "job {} carries a {} payload, expected {}",
        job.id,
        job.kind(),
        expected
    ))
}

/// Apply the output policy to a finished process and map it to the job
/// outcome. Logs are written before the exit status is judged, so failed and
/// timed-out runs leave logs too.
async fn finish_process(
    job: &Job,
    report: ProcessReport,
    policy: &OutputPolicy,
    files: &FileManager,
) -> Result<ProcessResult> {
    let logs = match policy {
        OutputPolicy::Inline => None,
        OutputPolicy::LogFiles { dir } => {
            let logs = LogPaths {
                out: dir.join(format!("{}.out.log", job.id)),
                err: dir.join(format!("{}.err.log", job.id)),
            };
            files.write_file(&logs.out, &report.stdout).await?;
            files.write_file(&logs.err, &report.stderr).await?;
            tracing::debug!(out = %logs.out.display(), "Process output persisted");
            Some(logs)
        }
    };

    if report.truncated {
        tracing::warn!(job_id = %job.id, "Process output exceeded capture limit and was truncated");
    }

    let report = report.into_result()?;
    let msg = match &logs {
        Some(logs) => logs.out.display().to_string(),
        None => report.stdout,
    };
    Ok(ProcessResult {
        kind: report.kind,
        msg,
        logs,
        artifact: None,
    })
}

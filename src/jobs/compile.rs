use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use crate::catalog::FileType;
use crate::error::{JobError, Result};
use crate::jobs::{finish_process, payload_mismatch, Services};
use crate::scheduler::{Job, JobData, JobHandler, JobKind, JobOutput};
use crate::worker::ProcessSpec;

/// Compiles a user's source against an environment. Classes are written
/// under the home root, so `package <owner>.<cate>;` sources land next to
/// their `.java` file and show up in the owner's next scan.
#[derive(Debug, Clone)]
pub struct CompileJob {
    services: Services,
}

impl CompileJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::Compile(req) = &job.data else {
            return Err(payload_mismatch(job, "compile"));
        };
        let users = &self.services.users;

        let owner = users.get_user(&req.owner).await.map_err(|_| {
            JobError::Validation(format!("unknown file owner {:?}", req.owner))
        })?;
        let source = owner
            .file(FileType::Java, &req.cate, &req.name)
            .map(|f| f.path.clone())
            .ok_or_else(|| {
                JobError::Validation(format!(
                    "no source {}/{}/{}",
                    req.owner, req.cate, req.name
                ))
            })?;

        let classpath = self.services.envs.classpath(&req.env).await?;
        let sim = &self.services.sim;
        let spec = ProcessSpec::new(&sim.javac)
            .arg("-cp")
            .arg(classpath.to_string_lossy())
            .arg("-d")
            .arg(users.home_dir().to_string_lossy())
            .arg(source.to_string_lossy())
            .ttl(Some(job.ttl.unwrap_or(sim.compile_ttl)));

        let report = self.services.runner.run(spec).await?;
        let mut result = finish_process(job, report, &sim.output, &self.services.files).await?;

        let files = users.scan_home(&req.owner).await?;
        result.artifact = files
            .iter()
            .find(|f| f.file_type == FileType::Class && f.cate == req.cate && f.name == req.name)
            .map(|f| json!({ "jpath": f.jpath, "path": f.path }));
        if result.artifact.is_none() {
            tracing::warn!(owner = %req.owner, name = %req.name, "Compiled class not found in owner's tree");
        }

        Ok(JobOutput::Process(result))
    }
}

impl JobHandler for CompileJob {
    fn kind(&self) -> JobKind {
        JobKind::Compile
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

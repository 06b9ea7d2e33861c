use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;
use crate::jobs::{finish_process, payload_mismatch, Services};
use crate::scheduler::{Job, JobData, JobHandler, JobKind, JobOutput};
use crate::worker::ProcessSpec;

/// Runs the simulator of an environment with four user-chosen classes:
/// `java -cp <classpath> <main> <gen> <sche> <sim> <plat> <argu...>`
#[derive(Debug, Clone)]
pub struct SimulateJob {
    services: Services,
}

impl SimulateJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    async fn run(&self, job: &Job) -> Result<JobOutput> {
        let JobData::Simulate(req) = &job.data else {
            return Err(payload_mismatch(job, "simulate"));
        };
        let locators = [&req.gen, &req.sche, &req.sim, &req.plat];
        for locator in locators {
            locator.validate()?;
        }

        let env_dir = self.services.envs.resolve(&req.env).await?;
        let classpath = self.services.envs.classpath(&req.env).await?;
        let sim = &self.services.sim;
        let ttl = job.ttl.unwrap_or(sim.simulate_ttl);

        let spec = ProcessSpec::new(&sim.java)
            .arg("-cp")
            .arg(classpath.to_string_lossy())
            .arg(sim.main_class.clone())
            .args(locators.iter().map(|l| l.jpath.clone()))
            .args(req.argu.iter().cloned())
            .current_dir(env_dir)
            .ttl(Some(ttl));

        let report = self.services.runner.run(spec).await?;
        let result = finish_process(job, report, &sim.output, &self.services.files).await?;
        Ok(JobOutput::Process(result))
    }
}

impl JobHandler for SimulateJob {
    fn kind(&self) -> JobKind {
        JobKind::Simulate
    }

    fn execute<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<JobOutput>> {
        self.run(job).boxed()
    }
}

//! Shared fixtures for integration tests.
//!
//! Builds a throwaway catalog (user homes, one simulation environment, a
//! users file) plus fake `java`/`javac` scripts, so job kinds can be
//! exercised end to end without a JDK.
#![allow(dead_code)]

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use simforge::config::{Config, OutputPolicy};
use simforge::jobs::{self, Services};
use simforge::scheduler::{
    CompileRequest, FileRequest, Job, JobData, JobManager, Locator, PubTarget, SimulateRequest,
    UserPatch,
};

pub const ENV: &str = "sim1";

/// Echoes its arguments. Recognizes a few magic simulator arguments:
/// `hang` sleeps past any test TTL, `fail` exits 3 with a stderr message,
/// `trace <label>` appends start/end markers to `trace.log` in the cwd.
const FAKE_JAVA: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    hang) exec sleep 10 ;;
    fail) echo "oops" >&2; exit 3 ;;
    trace) echo "start $9" >> trace.log; sleep 0.2; echo "end $9" >> trace.log ;;
  esac
done
echo "$@"
"#;

/// Writes `<source stem>.class` next to the source, the way `javac -d <home>`
/// does for a `package <owner>.<cate>;` source. Sources named `Broken` fail.
const FAKE_JAVAC: &str = r#"#!/bin/sh
for last in "$@"; do :; done
case "$last" in
  *Broken.java) echo "$last:1: error: ';' expected" >&2; exit 1 ;;
esac
: > "${last%.java}.class"
"#;

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A temporary catalog with users `alice` and `bob` and environment `sim1`.
pub struct TestCatalog {
    pub dir: TempDir,
    pub config: Config,
}

impl TestCatalog {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let home = root.join("home");
        let env_root = root.join("env");
        let env_dir = env_root.join(ENV);
        let bin = root.join("bin");
        for d in [
            home.join("alice").join("src"),
            home.join("bob").join("src"),
            env_dir.join("lib"),
            env_dir.join("builtin").join("admin").join("generator"),
            bin.clone(),
        ] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(env_dir.join("lib").join("sim.jar"), b"").unwrap();
        std::fs::write(
            env_dir
                .join("builtin")
                .join("admin")
                .join("generator")
                .join("Uniform.class"),
            b"",
        )
        .unwrap();

        let users_file = root.join("users.json");
        let users = json!([
            { "name": "alice", "passwd": "alice-pw", "files": [] },
            { "name": "bob", "passwd": "bob-pw", "files": [] },
        ]);
        std::fs::write(&users_file, users.to_string()).unwrap();

        let java = write_script(&bin, "java", FAKE_JAVA);
        let javac = write_script(&bin, "javac", FAKE_JAVAC);

        let mut config = Config::new(&home, &env_root)
            .with_users_file(&users_file)
            .with_binaries(java, javac);
        config.sim.simulate_ttl = Duration::from_secs(5);
        config.sim.compile_ttl = Duration::from_secs(5);
        config.runner.kill_grace = Duration::from_secs(1);
        config.runner.drain_grace = Duration::from_millis(200);

        Self { dir, config }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn env_dir(&self) -> PathBuf {
        self.config.catalog.env_root.join(ENV)
    }

    pub fn users_file(&self) -> PathBuf {
        self.path("users.json")
    }

    /// Route process output to `<tmp>/logs` instead of returning it inline.
    pub fn with_log_files(mut self) -> Self {
        let dir = self.path("logs");
        self.config = self.config.with_output(OutputPolicy::LogFiles { dir });
        self
    }

    pub async fn services(&self) -> Services {
        Services::load(&self.config).await.unwrap()
    }

    pub async fn start(&self) -> (Services, JobManager) {
        let services = self.services().await;
        let manager = jobs::manager(&self.config, &services).unwrap();
        (services, manager)
    }
}

// =============================================================================
// Job builders
// =============================================================================

pub fn store_job(owner: &str, cate: &str, name: &str, content: &str) -> Job {
    Job::new(
        owner,
        JobData::Store(FileRequest {
            cate: cate.to_string(),
            name: name.to_string(),
            content: Some(content.to_string()),
        }),
    )
}

pub fn read_job(owner: &str, cate: &str, name: &str) -> Job {
    Job::new(
        owner,
        JobData::Read(FileRequest {
            cate: cate.to_string(),
            name: name.to_string(),
            content: None,
        }),
    )
}

pub fn delete_job(owner: &str, cate: &str, name: &str) -> Job {
    Job::new(
        owner,
        JobData::Delete(FileRequest {
            cate: cate.to_string(),
            name: name.to_string(),
            content: None,
        }),
    )
}

pub fn compile_job(owner: &str, cate: &str, name: &str) -> Job {
    Job::new(
        owner,
        JobData::Compile(CompileRequest {
            env: ENV.to_string(),
            owner: owner.to_string(),
            cate: cate.to_string(),
            name: name.to_string(),
        }),
    )
}

pub fn simulate_job(owner: &str, argu: &[&str], ttl_ms: Option<u64>) -> Job {
    Job::new(
        owner,
        JobData::Simulate(SimulateRequest {
            env: ENV.to_string(),
            gen: Locator::new("admin.generator.Uniform"),
            sche: Locator::new("alice.scheduler.Fifo"),
            sim: Locator::new("alice.simulator.Basic"),
            plat: Locator::new("alice.platform.Single"),
            argu: argu.iter().map(|a| a.to_string()).collect(),
            ttl: ttl_ms,
        }),
    )
}

pub fn add_pub_job(owner: &str, cate: &str, name: &str) -> Job {
    Job::new(
        owner,
        JobData::UserMod(UserPatch::AddPub(PubTarget {
            file_type: simforge::catalog::FileType::Class,
            cate: cate.to_string(),
            name: name.to_string(),
        })),
    )
}

// =============================================================================
// Assertions
// =============================================================================

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn assert_eventually<F, Fut>(mut check: F, timeout: Duration, msg: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}: {}", timeout, msg);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

use std::path::PathBuf;
use std::time::Duration;

/// Where process-backed jobs put their captured output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputPolicy {
    /// Return stdout in the job's success payload.
    #[default]
    Inline,
    /// Persist stdout/stderr to `<dir>/<job id>.out.log` and `.err.log`.
    LogFiles { dir: PathBuf },
}

/// Layout of the on-disk user and environment catalog.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Root of per-user trees: `<home_dir>/<user>/<category>/<name>.java`
    pub home_dir: PathBuf,
    /// Root of simulation environments: `<env_root>/<env>/{lib,builtin}`
    pub env_root: PathBuf,
    /// JSON file holding user records. `None` keeps users in memory only.
    pub users_file: Option<PathBuf>,
    /// Category directories scanned under each user's home.
    pub categories: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from("home"),
            env_root: PathBuf::from("env"),
            users_file: None,
            categories: ["generator", "scheduler", "simulator", "platform", "src"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Supervision limits for spawned processes.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for the exit event after a timeout kill before
    /// completing the invocation anyway. Zero skips the wait entirely.
    pub kill_grace: Duration,
    /// How long to keep draining stdout/stderr once the process is gone.
    pub drain_grace: Duration,
    /// Cap on bytes captured per stream.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(2),
            drain_grace: Duration::from_millis(500),
            max_output_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Compiler and simulator invocation settings.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub java: PathBuf,
    pub javac: PathBuf,
    /// Entry point class handed to `java`.
    pub main_class: String,
    /// TTL used by simulate jobs that don't carry one.
    pub simulate_ttl: Duration,
    pub compile_ttl: Duration,
    pub output: OutputPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            javac: PathBuf::from("javac"),
            main_class: "Main".to_string(),
            simulate_ttl: Duration::from_secs(60),
            compile_ttl: Duration::from_secs(30),
            output: OutputPolicy::Inline,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub runner: RunnerConfig,
    pub sim: SimConfig,
    pub queue: QueueConfig,
}

impl Config {
    pub fn new(home_dir: impl Into<PathBuf>, env_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog: CatalogConfig {
                home_dir: home_dir.into(),
                env_root: env_root.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_users_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog.users_file = Some(path.into());
        self
    }

    pub fn with_output(mut self, output: OutputPolicy) -> Self {
        self.sim.output = output;
        self
    }

    pub fn with_binaries(mut self, java: impl Into<PathBuf>, javac: impl Into<PathBuf>) -> Self {
        self.sim.java = java.into();
        self.sim.javac = javac.into();
        self
    }
}

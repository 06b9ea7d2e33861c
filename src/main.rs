use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use simforge::catalog::{FileMeta, SimEnvironments, UserManager};
use simforge::config::{Config, OutputPolicy};
use simforge::jobs::{self, Services};
use simforge::scheduler::{Job, JobHandle, JobKind, JobSpec, JobStatus};
use simforge::shutdown::{install_shutdown_handler, shutdown_on};

#[derive(Parser, Debug)]
#[command(name = "simforge")]
#[command(version)]
#[command(about = "Serialized compile and simulation job runner")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    catalog: CatalogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run jobs from JSON files, one after another, in the given order
    Run(RunArgs),

    /// Rescan and list a user's files
    Files {
        /// User name
        #[arg(long)]
        user: String,
    },

    /// List simulation environments and their builtin classes
    Envs,
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CatalogArgs {
    /// Root of user home trees
    #[arg(long, default_value = "home", global = true)]
    home: PathBuf,

    /// Root of simulation environments
    #[arg(long, default_value = "env", global = true)]
    env_root: PathBuf,

    /// JSON file holding user records
    #[arg(long, global = true)]
    users_file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job files; each holds one job object or an array of them
    #[arg(required = true)]
    jobs: Vec<PathBuf>,

    /// Java launcher used for simulations
    #[arg(long, default_value = "java")]
    java: PathBuf,

    /// Java compiler
    #[arg(long, default_value = "javac")]
    javac: PathBuf,

    /// Simulator entry point class
    #[arg(long, default_value = "Main")]
    main_class: String,

    /// Persist process output to <log-dir>/<job id>.{out,err}.log instead of
    /// returning it inline
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Default simulation TTL in milliseconds
    #[arg(long, default_value = "60000")]
    simulate_ttl_ms: u64,

    /// Compilation TTL in milliseconds
    #[arg(long, default_value = "30000")]
    compile_ttl_ms: u64,

    /// Grace period after a timeout kill, in milliseconds
    #[arg(long, default_value = "2000")]
    kill_grace_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobResultOutput {
    job_id: String,
    kind: JobKind,
    status: JobStatus,
    timeout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn build_config(catalog: &CatalogArgs) -> Config {
    let mut config = Config::new(&catalog.home, &catalog.env_root);
    if let Some(users_file) = &catalog.users_file {
        config = config.with_users_file(users_file);
    }
    config
}

async fn read_job_file(path: &Path) -> Result<Vec<JobSpec>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let specs = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(specs)
}

fn print_files(files: &[FileMeta]) {
    if files.is_empty() {
        println!("No files found.");
        return;
    }
    println!("{:<6} {:<12} {:<24} {:<4} JPATH", "TYPE", "CATEGORY", "NAME", "PUB");
    println!("{}", "-".repeat(78));
    for f in files {
        println!(
            "{:<6} {:<12} {:<24} {:<4} {}",
            f.file_type.to_string(),
            f.cate,
            f.name,
            if f.public { "yes" } else { "no" },
            f.jpath.as_deref().unwrap_or("-")
        );
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_run(
    args: RunArgs,
    mut config: Config,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    config = config.with_binaries(&args.java, &args.javac);
    config.sim.main_class = args.main_class;
    config.sim.simulate_ttl = Duration::from_millis(args.simulate_ttl_ms);
    config.sim.compile_ttl = Duration::from_millis(args.compile_ttl_ms);
    config.runner.kill_grace = Duration::from_millis(args.kill_grace_ms);
    if let Some(dir) = args.log_dir {
        config = config.with_output(OutputPolicy::LogFiles { dir });
    }

    let mut jobs_to_run = Vec::new();
    for path in &args.jobs {
        for spec in read_job_file(path).await? {
            jobs_to_run.push(Job::from_spec(spec)?);
        }
    }

    let services = Services::load(&config).await?;
    let manager = jobs::manager(&config, &services)?;
    let shutdown = shutdown_on(install_shutdown_handler(), manager.clone());

    let handles: Vec<(JobKind, JobHandle)> = jobs_to_run
        .into_iter()
        .map(|job| (job.kind(), manager.submit(job)))
        .collect();
    tracing::info!(count = handles.len(), "Jobs submitted");

    let mut results = Vec::with_capacity(handles.len());
    for (kind, handle) in handles {
        let job_id = handle.id().to_string();
        let row = match handle.await {
            Ok(out) => JobResultOutput {
                job_id,
                kind,
                status: JobStatus::Completed,
                timeout: false,
                result: Some(serde_json::to_value(&out)?),
                error: None,
            },
            Err(e) => JobResultOutput {
                job_id,
                kind,
                status: JobStatus::Failed,
                timeout: e.is_timeout(),
                result: None,
                error: Some(e.to_string()),
            },
        };
        results.push(row);
    }

    manager.shutdown().await;
    shutdown.abort();

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Table => {
            println!("{:<38} {:<10} {:<10} DETAIL", "JOB ID", "KIND", "STATUS");
            println!("{}", "-".repeat(78));
            for r in &results {
                let status = if r.timeout {
                    "TIMEOUT".to_string()
                } else {
                    r.status.to_string().to_uppercase()
                };
                let detail = match (&r.result, &r.error) {
                    (Some(v), _) => v
                        .get("msg")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| v.to_string()),
                    (None, Some(e)) => e.clone(),
                    (None, None) => String::new(),
                };
                let mut lines = detail.lines();
                println!(
                    "{:<38} {:<10} {:<10} {}",
                    r.job_id,
                    r.kind.to_string(),
                    status,
                    lines.next().unwrap_or("")
                );
                for line in lines {
                    println!("{:<60} {}", "", line);
                }
            }
        }
    }

    let failed = results
        .iter()
        .filter(|r| r.status == JobStatus::Failed)
        .count();
    if failed > 0 {
        return Err(format!("{} of {} jobs failed", failed, results.len()).into());
    }
    Ok(())
}

async fn handle_files(
    user: String,
    config: Config,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let users = UserManager::load(&config.catalog).await?;
    let files = users.scan_home(&user).await?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Table => print_files(&files),
    }
    Ok(())
}

async fn handle_envs(config: Config, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let envs = SimEnvironments::new(&config.catalog);
    let mut listing = Vec::new();
    for env in envs.list().await? {
        let builtin = envs.builtin(&env).await?;
        listing.push((env, builtin));
    }

    match output {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = listing
                .into_iter()
                .map(|(env, files)| Ok((env, serde_json::to_value(files)?)))
                .collect::<Result<_, serde_json::Error>>()?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Table => {
            for (env, files) in &listing {
                println!("Environment: {}", env);
                println!("{}", "=".repeat(40));
                print_files(files);
                println!();
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args.catalog);
    let output = args.catalog.output.clone();

    match args.command {
        Commands::Run(run_args) => handle_run(run_args, config, &output).await?,
        Commands::Files { user } => handle_files(user, config, &output).await?,
        Commands::Envs => handle_envs(config, &output).await?,
    }

    Ok(())
}

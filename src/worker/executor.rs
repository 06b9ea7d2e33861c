use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::RunnerConfig;
use crate::error::{JobError, Result};
use crate::scheduler::ResultType;
use crate::worker::killer::Killer;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A piece of process output, delivered as soon as it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: Stream,
    pub data: Vec<u8>,
}

/// Lifecycle of one invocation. A failed spawn never produces an
/// [`Invocation`]; it surfaces as [`JobError::Spawn`] from
/// [`ProcessRunner::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationState {
    Spawning,
    Running { pid: Option<u32> },
    ExitedNormally { code: Option<i32> },
    KilledOnTimeout { reaped: bool },
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationState::ExitedNormally { .. } | InvocationState::KilledOnTimeout { .. }
        )
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited { code: Option<i32> },
    /// Killed by the TTL timer. `reaped` is false when the exit event never
    /// arrived within the kill grace period.
    TimedOut { ttl: Duration, reaped: bool },
}

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub ttl: Option<Duration>,
    pub sink: Option<mpsc::UnboundedSender<OutputChunk>>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            ttl: None,
            sink: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Forward output chunks to `tx` while the process runs.
    pub fn stream_to(mut self, tx: mpsc::UnboundedSender<OutputChunk>) -> Self {
        self.sink = Some(tx);
        self
    }
}

/// Result of a finished invocation.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub program: String,
    pub termination: Termination,
    /// `success` on exit code 0, `timeout` once the killer fired
    pub kind: Option<ResultType>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ProcessReport {
    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited { code } => code,
            Termination::TimedOut { .. } => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.kind == Some(ResultType::Success)
    }

    /// Map the report to the job outcome: exit 0 is success, anything else
    /// a process or timeout failure.
    pub fn into_result(self) -> Result<ProcessReport> {
        match self.termination {
            Termination::TimedOut { ttl, .. } => Err(JobError::Timeout {
                ttl,
                stdout: self.stdout,
                stderr: self.stderr,
            }),
            Termination::Exited { code: Some(0) } => Ok(self),
            Termination::Exited { code } => Err(JobError::Process {
                code,
                stderr: self.stderr,
            }),
        }
    }
}

#[derive(Debug, Default)]
struct CaptureBuf {
    data: Vec<u8>,
    truncated: bool,
}

/// Background reader feeding one output accumulator.
struct Capture {
    buf: Arc<Mutex<CaptureBuf>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R>(
        reader: Option<R>,
        stream: Stream,
        max_bytes: usize,
        sink: Option<mpsc::UnboundedSender<OutputChunk>>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(CaptureBuf::default()));
        let task_buf = buf.clone();
        let task = tokio::spawn(async move {
            if let Some(reader) = reader {
                pump(reader, stream, task_buf, max_bytes, sink).await;
            }
        });
        Self { buf, task }
    }

    fn take(&self) -> CaptureBuf {
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: Stream,
    buf: Arc<Mutex<CaptureBuf>>,
    max_bytes: usize,
    sink: Option<mpsc::UnboundedSender<OutputChunk>>,
) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(?stream, error = %e, "Output stream closed with error");
                break;
            }
        };
        {
            let mut acc = buf.lock().unwrap_or_else(PoisonError::into_inner);
            let room = max_bytes.saturating_sub(acc.data.len());
            if n > room {
                acc.truncated = true;
            }
            acc.data.extend_from_slice(&chunk[..n.min(room)]);
        }
        if let Some(sink) = &sink {
            // Receiver may be gone; capture continues regardless.
            let _ = sink.send(OutputChunk {
                stream,
                data: chunk[..n].to_vec(),
            });
        }
    }
}

/// Spawns and supervises external processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Spawn the process and wait for its terminal report.
    pub async fn run(&self, spec: ProcessSpec) -> Result<ProcessReport> {
        let invocation = self.spawn(spec)?;
        Ok(invocation.wait().await)
    }

    /// Start the process. The TTL clock starts here, not at submission.
    pub fn spawn(&self, spec: ProcessSpec) -> Result<Invocation> {
        let program = spec.program.display().to_string();
        let (state_tx, _) = watch::channel(InvocationState::Spawning);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(program = %program, error = %source, "Failed to spawn process");
                return Err(JobError::Spawn { program, source });
            }
        };

        let pid = child.id();
        let killer = Killer::arm(spec.ttl);
        let max = self.config.max_output_bytes;
        let stdout = Capture::start(child.stdout.take(), Stream::Stdout, max, spec.sink.clone());
        let stderr = Capture::start(child.stderr.take(), Stream::Stderr, max, spec.sink);
        state_tx.send_replace(InvocationState::Running { pid });

        tracing::info!(
            program = %program,
            args = ?spec.args,
            pid = ?pid,
            ttl_ms = ?killer.ttl().map(|d| d.as_millis()),
            "Process started"
        );

        Ok(Invocation {
            program,
            child,
            killer,
            stdout,
            stderr,
            state: state_tx,
            started: Instant::now(),
            config: self.config.clone(),
        })
    }
}

/// A running process together with its killer and output accumulators.
pub struct Invocation {
    program: String,
    child: Child,
    killer: Killer,
    stdout: Capture,
    stderr: Capture,
    state: watch::Sender<InvocationState>,
    started: Instant,
    config: RunnerConfig,
}

impl Invocation {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn state(&self) -> watch::Receiver<InvocationState> {
        self.state.subscribe()
    }

    /// Wait for the process to end by itself or by the killer. Always
    /// returns exactly one report, even when a killed process never
    /// reports its exit.
    pub async fn wait(mut self) -> ProcessReport {
        enum Woke {
            Exited(std::io::Result<std::process::ExitStatus>),
            Expired,
        }

        let woke = tokio::select! {
            status = self.child.wait() => Woke::Exited(status),
            _ = self.killer.expired() => Woke::Expired,
        };

        let mut kind = None;
        let termination = match woke {
            Woke::Exited(status) => {
                self.killer.disarm();
                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!(program = %self.program, error = %e, "Failed to collect exit status");
                        None
                    }
                };
                if code == Some(0) {
                    kind = Some(ResultType::Success);
                }
                self.state.send_replace(InvocationState::ExitedNormally { code });
                Termination::Exited { code }
            }
            Woke::Expired => {
                let ttl = self.killer.ttl().unwrap_or_default();
                if self.killer.fire() {
                    kind = Some(ResultType::Timeout);
                }
                tracing::warn!(program = %self.program, ttl_ms = ttl.as_millis() as u64, "TTL exceeded, killing process");
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(program = %self.program, error = %e, "Kill signal failed");
                }
                let grace = self.config.kill_grace;
                let reaped = !grace.is_zero()
                    && tokio::time::timeout(grace, self.child.wait()).await.is_ok();
                if !reaped {
                    tracing::error!(
                        program = %self.program,
                        grace_ms = grace.as_millis() as u64,
                        "Process did not exit after kill, completing without reaping"
                    );
                }
                self.state
                    .send_replace(InvocationState::KilledOnTimeout { reaped });
                Termination::TimedOut { ttl, reaped }
            }
        };

        self.drain().await;
        let out = self.stdout.take();
        let err = self.stderr.take();
        let elapsed = self.started.elapsed();

        tracing::info!(
            program = %self.program,
            termination = ?termination,
            elapsed_ms = elapsed.as_millis() as u64,
            "Process finished"
        );

        ProcessReport {
            program: self.program,
            termination,
            kind,
            stdout: String::from_utf8_lossy(&out.data).into_owned(),
            stderr: String::from_utf8_lossy(&err.data).into_owned(),
            truncated: out.truncated || err.truncated,
            elapsed,
        }
    }

    /// Give the readers a bounded window to hit EOF; a grandchild holding the
    /// pipe open must not stall completion.
    async fn drain(&mut self) {
        let (out_task, err_task) = (&mut self.stdout.task, &mut self.stderr.task);
        let readers = async move {
            let _ = out_task.await;
            let _ = err_task.await;
        };
        if tokio::time::timeout(self.config.drain_grace, readers).await.is_err() {
            tracing::debug!(program = %self.program, "Output still open after exit, abandoning readers");
            self.stdout.task.abort();
            self.stderr.task.abort();
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("state", &*self.state.borrow())
            .field("killer", &self.killer)
            .finish()
    }
}

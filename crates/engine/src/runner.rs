//! External tool lifecycle: launch, diagnostic streaming, exit classification
//! and graceful-then-forceful cancellation.
//!
//! A [`StageRunner::start`] call never blocks: the process is spawned and
//! supervised on its own task, and the caller hears about it only through the
//! [`Notify`] callback (`Output` lines, then exactly one `Exited`). Handles are
//! short-lived values owned for one invocation and dropped afterwards.

use crate::error::PipelineError;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep reading output after the process exits. A background
/// child that inherited stderr can hold the pipe open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One external tool invocation: executable plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    /// Short tool name used in messages ("ffmpeg", "rife-ncnn-vulkan")
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl StageInvocation {
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments as strings (lossy), mostly for assertions and logging
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Value following `flag` in the argument list, if any
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        let args = self.args_lossy();
        args.windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].clone())
    }

    /// Human-readable command line, quoting arguments that contain spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args_lossy())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("\"{}\"", part)
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Terminal classification of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Exit code 0
    Completed,
    /// Non-zero exit code
    FailedExit(i32),
    /// Terminated by a signal it did not ask for
    Crashed,
    /// Could not be spawned (missing executable, permission denied)
    LaunchError(String),
    /// Stopped because cancellation was requested
    Cancelled,
}

impl StageOutcome {
    /// Map a non-success outcome onto the pipeline error taxonomy
    pub fn into_result(self, tool: &str) -> Result<(), PipelineError> {
        let tool = tool.to_string();
        match self {
            StageOutcome::Completed => Ok(()),
            StageOutcome::FailedExit(code) => Err(PipelineError::Execution { tool, code }),
            StageOutcome::Crashed => Err(PipelineError::Crashed { tool }),
            StageOutcome::LaunchError(reason) => Err(PipelineError::Launch { tool, reason }),
            StageOutcome::Cancelled => Err(PipelineError::Cancelled { tool }),
        }
    }
}

/// Notification delivered by a running invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    /// One line (or `\r`-separated segment) of diagnostic output
    Output(String),
    /// Always the last event of an invocation
    Exited(StageOutcome),
}

/// Callback receiving runner events; called from the supervising task
pub type Notify = Arc<dyn Fn(RunnerEvent) + Send + Sync>;

/// Handle to one outstanding invocation
#[derive(Debug)]
pub struct StageHandle {
    label: String,
    cancel: CancellationToken,
    task: JoinHandle<StageOutcome>,
}

impl StageHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ask the process to stop: SIGTERM first, kill after the grace period.
    /// Idempotent; the `Exited(Cancelled)` notification still follows.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> StageOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => StageOutcome::LaunchError(format!("supervisor task failed: {}", e)),
        }
    }
}

/// Launches invocations; holds only the cancellation grace period
#[derive(Debug, Clone)]
pub struct StageRunner {
    grace: Duration,
}

impl StageRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Spawn `invocation` on a supervising task and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, invocation: StageInvocation, notify: Notify) -> StageHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let grace = self.grace;
        let label = invocation.label.clone();

        let task = tokio::spawn(async move {
            let outcome = supervise(invocation, grace, token, notify.clone()).await;
            notify(RunnerEvent::Exited(outcome.clone()));
            outcome
        });

        StageHandle {
            label,
            cancel,
            task,
        }
    }
}

async fn supervise(
    invocation: StageInvocation,
    grace: Duration,
    token: CancellationToken,
    notify: Notify,
) -> StageOutcome {
    if token.is_cancelled() {
        return StageOutcome::Cancelled;
    }

    let mut child = match invocation.to_command().spawn() {
        Ok(child) => child,
        Err(e) => return StageOutcome::LaunchError(e.to_string()),
    };

    let pump = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(pump_lines(stderr, notify)));

    tokio::select! {
        status = child.wait() => {
            // drain what is left in the pipe so Output always precedes Exited
            match pump {
                Some(pump) => drain(pump, &token, classify(status)).await,
                None => classify(status),
            }
        }
        _ = token.cancelled() => {
            terminate(&mut child, grace).await;
            if let Some(pump) = pump {
                pump.abort();
            }
            StageOutcome::Cancelled
        }
    }
}

/// Wait for the output pump after the process has exited, giving up on
/// cancellation or after [`DRAIN_TIMEOUT`].
async fn drain(
    mut pump: JoinHandle<()>,
    token: &CancellationToken,
    outcome: StageOutcome,
) -> StageOutcome {
    tokio::select! {
        _ = &mut pump => outcome,
        _ = token.cancelled() => {
            pump.abort();
            StageOutcome::Cancelled
        }
        _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
            tracing::warn!("output pipe still open after exit, stop reading");
            pump.abort();
            outcome
        }
    }
}

fn classify(status: std::io::Result<ExitStatus>) -> StageOutcome {
    match status {
        Ok(s) if s.success() => StageOutcome::Completed,
        Ok(s) => match s.code() {
            Some(code) => StageOutcome::FailedExit(code),
            None => StageOutcome::Crashed,
        },
        Err(e) => StageOutcome::LaunchError(format!("failed waiting for process: {}", e)),
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            tracing::warn!(pid, "process ignored SIGTERM, killing");
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill().await;
}

async fn pump_lines<R: AsyncRead + Unpin>(mut reader: R, notify: Notify) {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    notify(RunnerEvent::Output(line));
                }
            }
        }
    }
    if let Some(rest) = splitter.finish() {
        notify(RunnerEvent::Output(rest));
    }
}

/// Splits a byte stream on `\n` and `\r`, holding partial lines until the
/// next chunk. Blank segments are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

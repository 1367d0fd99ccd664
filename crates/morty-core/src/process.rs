//! Process Runner: supervises the assistant subprocess (spec.md Section 4.6).
//!
//! Spawns with `tokio::process::Command`, the way the teacher's
//! `loopd::runner` does, but generalized: a caller-supplied argv/env/cwd
//! instead of a hardcoded `claude` invocation, a real deadline timer with
//! graceful-then-forceful termination instead of drop-kills-process, and a
//! capture/stream/both/silent output-mode switch with a byte cap instead of
//! unconditional capture-to-memory.

use crate::errors::ProcessError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// How captured output should be handled (spec Section 4.6: "capture-to-memory,
/// stream-to-terminal, both, silent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Capture,
    Stream,
    Both,
    Silent,
}

/// One invocation's parameters.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// `None` inherits the parent's environment unmodified; entries here
    /// are layered on top of it.
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    /// Zero means unbounded (spec Section 4.6: "Zero timeout means unbounded").
    pub deadline: Duration,
    pub grace_period: Duration,
    pub output_mode: OutputMode,
    pub capture_cap_bytes: usize,
    /// Optional per-job log file; when set, captured output is tee'd there
    /// with a header/footer (spec Section 4.6: "Logging").
    pub log_path: Option<PathBuf>,
    pub log_header: Option<String>,
}

/// Outcome of one supervised run (spec Section 4.6: "returns
/// `{exit_code, stdout, stderr, duration, timed_out, signal}`").
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub signal: Option<i32>,
}

const TRUNCATION_MARKER: &str = "\n...[output truncated, capture cap exceeded]...\n";

/// Spawn and supervise `spec` with no external cancellation source.
pub async fn run(spec: &ProcessSpec) -> Result<ProcessOutcome, ProcessError> {
    run_cancellable(spec, None).await
}

/// Spawn and supervise `spec`, always waiting for the child to exit (spec
/// Section 4.6: "Zombie avoidance: the runner always waits for the child").
/// `cancel`, if given, fires when the calling context is cancelled (spec
/// Section 5: "a caller cancellation... translates into cancellation of the
/// current Process Runner call"); it races the deadline timer and triggers
/// the identical graceful-then-forceful sequence, surfaced as
/// `CallCLIKilled` rather than `CallCLITimeout`.
pub async fn run_cancellable(
    spec: &ProcessSpec,
    cancel: Option<tokio::sync::oneshot::Receiver<()>>,
) -> Result<ProcessOutcome, ProcessError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::piped());
    let (stdout_mode, stderr_mode) = match spec.output_mode {
        OutputMode::Silent => (Stdio::null(), Stdio::null()),
        _ => (Stdio::piped(), Stdio::piped()),
    };
    cmd.stdout(stdout_mode).stderr(stderr_mode);

    let start = std::time::Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcessError::NotFound(spec.program.clone())
        } else {
            ProcessError::Io(e)
        }
    })?;

    if let Some(prompt) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }
    } else {
        // No prompt: close stdin immediately so a child reading to EOF
        // doesn't block forever.
        drop(child.stdin.take());
    }

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    // Borrows `child`, `stdout_handle`, `stderr_handle` by unique reference
    // rather than moving them, so the timeout branch below can still reach
    // `child` to send a termination signal if this future is abandoned.
    let wait_future = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        if let Some(mut out) = stdout_handle.take() {
            let _ = out.read_to_end(&mut stdout_buf).await;
        }
        if let Some(mut err) = stderr_handle.take() {
            let _ = err.read_to_end(&mut stderr_buf).await;
        }
        let status = child.wait().await;
        (status, stdout_buf, stderr_buf)
    };

    enum Ending {
        Finished,
        TimedOut,
        Cancelled,
    }

    let deadline_future = async {
        if spec.deadline.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(spec.deadline).await;
        }
    };
    let cancel_future = async {
        match cancel {
            Some(rx) => {
                let _ = rx.await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(wait_future);
    tokio::pin!(deadline_future);
    tokio::pin!(cancel_future);

    let (status_result, stdout_bytes, stderr_bytes, ending) = tokio::select! {
        (status, stdout_buf, stderr_buf) = &mut wait_future => {
            (status, stdout_buf, stderr_buf, Ending::Finished)
        }
        () = &mut deadline_future => {
            warn!(program = %spec.program, deadline_sec = spec.deadline.as_secs(), "process deadline exceeded");
            let (status, stdout_buf, stderr_buf) =
                terminate_gracefully(&mut child, spec.grace_period).await;
            (status, stdout_buf, stderr_buf, Ending::TimedOut)
        }
        () = &mut cancel_future => {
            warn!(program = %spec.program, "process run cancelled");
            let (status, stdout_buf, stderr_buf) =
                terminate_gracefully(&mut child, spec.grace_period).await;
            (status, stdout_buf, stderr_buf, Ending::Cancelled)
        }
    };
    let timed_out = matches!(ending, Ending::TimedOut);
    let cancelled = matches!(ending, Ending::Cancelled);

    let status = status_result?;
    let duration = start.elapsed();
    let exit_code = status.code();
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    let mut stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
    truncate_to_cap(&mut stdout, spec.capture_cap_bytes);
    truncate_to_cap(&mut stderr, spec.capture_cap_bytes);

    if matches!(spec.output_mode, OutputMode::Stream | OutputMode::Both) {
        print!("{stdout}");
        eprint!("{stderr}");
    }

    if let Some(log_path) = &spec.log_path {
        write_log(log_path, spec.log_header.as_deref(), &stdout, &stderr, exit_code)?;
    }

    info!(
        program = %spec.program,
        exit_code = ?exit_code,
        timed_out = timed_out,
        duration_ms = duration.as_millis() as u64,
        "process run complete"
    );

    if cancelled {
        return Err(ProcessError::Killed(stdout));
    }
    if timed_out {
        return Err(ProcessError::Timeout(spec.deadline.as_secs() as u32));
    }

    Ok(ProcessOutcome {
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
        signal,
    })
}

/// Send a cooperative termination signal, wait up to `grace_period`, then
/// force-kill if the child is still alive (spec Section 4.6: "on expiry,
/// the child is sent a graceful termination signal first; if still running
/// after a short grace period, a forceful signal").
async fn terminate_gracefully(
    child: &mut tokio::process::Child,
    grace_period: Duration,
) -> (std::io::Result<std::process::ExitStatus>, Vec<u8>, Vec<u8>) {
    send_graceful_signal(child);

    let drain = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_end(&mut stdout_buf).await;
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_end(&mut stderr_buf).await;
        }
        (stdout_buf, stderr_buf)
    };

    match timeout(grace_period, async { (child.wait().await, drain.await) }).await {
        Ok((status, (stdout_buf, stderr_buf))) => (status, stdout_buf, stderr_buf),
        Err(_) => {
            let _ = child.start_kill();
            let status = child.wait().await;
            (status, Vec::new(), Vec::new())
        }
    }
}

#[cfg(unix)]
fn send_graceful_signal(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is this child's own process id, obtained from the
        // `Child` handle we still own; sending SIGTERM to it is the
        // documented cooperative-shutdown request.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_graceful_signal(_child: &tokio::process::Child) {
    // No portable cooperative-termination signal; the grace-period wait
    // below still runs before falling back to `start_kill`.
}

fn truncate_to_cap(text: &mut String, cap_bytes: usize) {
    if cap_bytes == 0 || text.len() <= cap_bytes {
        return;
    }
    let mut boundary = cap_bytes;
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    text.truncate(boundary);
    text.push_str(TRUNCATION_MARKER);
}

fn write_log(
    path: &Path,
    header: Option<&str>,
    stdout: &str,
    stderr: &str,
    exit_code: Option<i32>,
) -> Result<(), ProcessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    if let Some(header) = header {
        writeln!(file, "{header}")?;
    }
    writeln!(file, "--- stdout ---")?;
    writeln!(file, "{stdout}")?;
    writeln!(file, "--- stderr ---")?;
    writeln!(file, "{stderr}")?;
    writeln!(file, "--- exit code: {} ---", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))?;
    Ok(())
}

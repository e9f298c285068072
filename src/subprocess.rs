//! Subprocess runner (§4.2) — launches an allow-listed utility with
//! arguments passed as a distinct vector, never a shell string, and
//! wires a byte stream to its stdin while lazily streaming its stdout.

use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::allowlist;
use crate::error::{EngineError, EngineResult};
use crate::stream::{io_error_to_engine_error, ByteStream};

/// Grace period between a gentle termination signal and a forced kill.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// How much of stderr is retained for error reporting (§4.2 "stderr_tail").
const STDERR_TAIL_BYTES: usize = 4096;

/// Handle to a running subprocess: its stdout stream, plus a handle
/// that resolves once the process has been reaped and reports how it
/// ended.
pub struct SpawnedCommand {
    pub stdout: ByteStream,
    pub wait: JoinHandle<EngineResult<()>>,
}

/// Launches `command` (which must be allow-listed) with `args`, piping
/// `stdin` into the child and streaming its stdout back lazily.
///
/// `cancel` is observed for the lifetime of the child; `timeout` bounds
/// its wall time regardless of cancellation.
pub fn run(
    command: &str,
    args: Vec<String>,
    stdin: ByteStream,
    cancel: CancellationToken,
    timeout: Duration,
) -> EngineResult<SpawnedCommand> {
    if !allowlist::contains(command) {
        return Err(EngineError::CommandNotAllowed(command.to_string()));
    }

    let mut child = Command::new(command)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::CommandFailed {
            command: command.to_string(),
            exit_code: -1,
            stderr_tail: format!("failed to spawn: {e}"),
        })?;

    let child_stdin = child.stdin.take().expect("piped stdin");
    let child_stdout = child.stdout.take().expect("piped stdout");
    let child_stderr = child.stderr.take().expect("piped stderr");

    let stdin_pump = tokio::spawn(pump_stdin(stdin, child_stdin, command.to_string()));
    let stderr_tail = tokio::spawn(capture_stderr_tail(child_stderr));

    let stdout = Box::pin(ReaderStream::new(child_stdout).map(|r| {
        r.map_err(std::io::Error::from)
    })) as ByteStream;

    let command_owned = command.to_string();
    let wait = tokio::spawn(async move {
        reap(&mut child, cancel, timeout, &command_owned, stderr_tail, stdin_pump).await
    });

    Ok(SpawnedCommand { stdout, wait })
}

/// Feeds `upstream` into the child's stdin. When `upstream` itself is a
/// failed/cancelled prior `command` stage's output (§4.4 `attach_wait`),
/// its terminal `Err` carries that stage's real `EngineError`; this is
/// returned rather than swallowed, so `reap` can fail this stage with
/// the same kind instead of letting a downstream process that merely
/// saw a broken pipe report success.
async fn pump_stdin(
    mut upstream: ByteStream,
    mut child_stdin: tokio::process::ChildStdin,
    command: String,
) -> EngineResult<()> {
    while let Some(chunk) = upstream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = child_stdin.write_all(&bytes).await {
                    debug!(command = %command, error = %e, "child stdin closed early");
                    return Ok(());
                }
            }
            Err(e) => {
                let engine_err = io_error_to_engine_error(e);
                warn!(command = %command, error = %engine_err, "upstream error while feeding subprocess stdin");
                return Err(engine_err);
            }
        }
    }
    let _ = child_stdin.shutdown().await;
    Ok(())
}

async fn capture_stderr_tail(mut stderr: tokio::process::ChildStderr) -> String {
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > STDERR_TAIL_BYTES * 4 {
                    let excess = buf.len() - STDERR_TAIL_BYTES * 2;
                    let _ = buf.split_to(excess);
                }
            }
            Err(_) => break,
        }
    }
    let s = String::from_utf8_lossy(&buf);
    let tail_start = s.len().saturating_sub(STDERR_TAIL_BYTES);
    s[tail_start..].trim().to_string()
}

async fn reap(
    child: &mut Child,
    cancel: CancellationToken,
    timeout: Duration,
    command: &str,
    stderr_tail: JoinHandle<String>,
    stdin_pump: JoinHandle<EngineResult<()>>,
) -> EngineResult<()> {
    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = cancel.cancelled() => Outcome::Cancelled,
        _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
    };

    let status = match outcome {
        Outcome::Exited(status) => status,
        Outcome::Cancelled | Outcome::TimedOut => {
            terminate_gracefully(child).await;
            let status = child.wait().await;
            if matches!(outcome, Outcome::Cancelled) {
                return Err(EngineError::Cancelled);
            }
            status
        }
    };

    let stderr_tail = stderr_tail.await.unwrap_or_default();

    // A failed/cancelled upstream stage always aborts this one, even if
    // this command happened to exit 0 on whatever partial input it got
    // before the pipe broke (§7, §9 "early-termination propagation").
    if let Ok(Err(upstream_err)) = stdin_pump.await {
        return Err(upstream_err);
    }

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(EngineError::CommandFailed {
            command: command.to_string(),
            exit_code: status.code().unwrap_or(-1),
            stderr_tail,
        }),
        Err(e) => Err(EngineError::CommandFailed {
            command: command.to_string(),
            exit_code: -1,
            stderr_tail: format!("wait() failed: {e}; stderr: {stderr_tail}"),
        }),
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is the live child's own pid, obtained above; a
        // bare SIGTERM has no memory-safety implications.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    tokio::select! {
        _ = child.wait() => return,
        _ = tokio::time::sleep(TERMINATION_GRACE) => {}
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child) {
    let _ = child.start_kill();
}

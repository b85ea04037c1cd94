//! Detached hold timer — the process that clears the sink after the hold.
//!
//! The timer is this same binary re-executed with the hidden `hold-timer`
//! subcommand, in a new session so it outlives the invoking shell command.
//! Re-exec keeps `fork()` out of a process that may already be running
//! runtime threads.
//!
//! Lifecycle of one pending clear:
//!
//! ```text
//! Created -> Armed (pid file written) -> Fired     (clear ran, pid file removed)
//!                                     -> Cancelled (SIGTERM, pid file removed)
//! ```
//!
//! Both terminal states go through [`cleanup`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};

use super::HoldError;
use super::pid::PidTracker;
use crate::session::SESSION_ENV;
use crate::sink;

/// Line the timer prints on stdout once its pid file is written.
const ARMED: &str = "armed";

/// How long the parent waits for the timer to report [`ARMED`].
const ARM_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters of one timer process.
#[derive(Debug, Clone)]
pub struct TimerSpec {
    pub pid_file: PathBuf,
    pub timeout: Duration,
    pub clear_cmd: Vec<String>,
}

/// How a timer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Timeout elapsed and the clear sink ran.
    Fired,
    /// Timeout elapsed but another timer owns the pid file now.
    Superseded,
    /// SIGTERM arrived first.
    Cancelled,
}

/// Launch `exe hold-timer ...` detached from our session and wait until it
/// has recorded its pid.
///
/// Returns the timer's pid. The child is not waited on; it is reparented
/// once this process exits.
pub async fn spawn_detached(exe: &Path, spec: &TimerSpec, debug: bool) -> Result<u32, HoldError> {
    let mut cmd = Command::new(exe);
    if debug {
        cmd.arg("--debug");
    }
    cmd.arg("hold-timer")
        .arg("--pid-file")
        .arg(&spec.pid_file)
        .arg("--timeout")
        .arg(spec.timeout.as_secs().to_string())
        .arg("--")
        .args(&spec.clear_cmd)
        .env_remove(SESSION_ENV)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if debug { Stdio::inherit() } else { Stdio::null() });

    // SAFETY: `pre_exec` runs in the child between fork and exec. `setsid`
    // is async-signal-safe and touches no Rust state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(HoldError::SpawnTimer)?;
    let pid = child.id().ok_or(HoldError::TimerExited)?;
    tracing::debug!(pid, "spawned hold timer");

    if let Some(stdout) = child.stdout.take() {
        let mut line = String::new();
        let mut reader = BufReader::new(stdout);
        match tokio::time::timeout(ARM_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(Ok(_)) if line.trim() == ARMED => tracing::debug!(pid, "hold timer armed"),
            Ok(Ok(_)) => return Err(HoldError::TimerExited),
            Ok(Err(e)) => return Err(HoldError::SpawnTimer(e)),
            Err(_) => tracing::warn!(pid, "hold timer did not confirm arming in time"),
        }
    }
    Ok(pid)
}

/// Body of the `hold-timer` process.
///
/// Installs the SIGTERM handler before claiming the pid file, reports
/// [`ARMED`] on `armed`, then sleeps. On wake the clear runs only if the pid
/// file still names this process or names nobody; a newer timer that took
/// over owns the clear instead.
pub async fn run<W>(spec: &TimerSpec, armed: &mut W) -> Result<TimerOutcome, HoldError>
where
    W: AsyncWrite + Unpin,
{
    let pid = std::process::id();
    let tracker = PidTracker::at(&spec.pid_file);
    let mut terminate = signal(SignalKind::terminate()).map_err(HoldError::Signal)?;

    tracker.write(pid)?;
    announce_armed(armed).await;
    tracing::debug!(pid, timeout = ?spec.timeout, "sleeping before clear");

    let outcome = tokio::select! {
        () = tokio::time::sleep(spec.timeout) => fire(&tracker, pid, &spec.clear_cmd).await,
        _ = terminate.recv() => {
            tracing::debug!(pid, "received SIGTERM");
            TimerOutcome::Cancelled
        }
    };

    cleanup(&tracker, pid);
    Ok(outcome)
}

async fn fire(tracker: &PidTracker, pid: u32, clear_cmd: &[String]) -> TimerOutcome {
    // Narrows, but cannot close, the window where a timer that was
    // superseded mid-sleep clears the newer secret.
    match tracker.read() {
        Ok(Some(owner)) if owner != pid => {
            tracing::debug!(pid, owner, "superseded, leaving clipboard alone");
            return TimerOutcome::Superseded;
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(pid, error = %e, "clearing despite unreadable pid file"),
    }

    tracing::debug!(pid, "clearing clipboard");
    if let Err(e) = sink::run_clear(clear_cmd).await {
        tracing::warn!(pid, error = %e, "clear sink failed");
    }
    TimerOutcome::Fired
}

/// Shared exit path for timeout and SIGTERM: drop the pid file if it is
/// still ours.
fn cleanup(tracker: &PidTracker, pid: u32) {
    match tracker.remove_if_owned(pid) {
        Ok(true) => tracing::debug!(pid, "removed pid file"),
        Ok(false) => tracing::debug!(pid, "pid file belongs to another timer"),
        Err(e) => tracing::warn!(pid, error = %e, "failed to remove pid file"),
    }
}

async fn announce_armed<W: AsyncWrite + Unpin>(out: &mut W) {
    // The parent may already be gone; nobody else is listening.
    let _ = out.write_all(format!("{ARMED}\n").as_bytes()).await;
    let _ = out.flush().await;
}

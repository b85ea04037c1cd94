//! Clipboard hold — copy a secret, then clear it after a timeout.
//!
//! A copy first cancels whatever clear is still pending (read the pid file,
//! SIGTERM its owner), then writes the new secret to the copy sink, then
//! spawns a detached timer that owns the next clear. The pid file is the
//! only shared state between invocations; see [`pid`].
//!
//! Cancellation is best-effort signal delivery. It is sent before the new
//! secret reaches the sink, but an old timer that already woke up may still
//! be running its clear when the new secret lands. The timer re-checks the
//! pid file just before clearing, which shrinks that window to the time
//! between the re-check and the clear sink finishing.
//!
//! Cleanup has the same shape: a cancelled timer removes the pid file only
//! if it still names itself, but the check and the unlink are separate
//! steps. The successor is spawned only after the copy sink exits, so the
//! old timer would have to stall for that long to delete the new record.

pub mod pid;
pub mod signal;
pub mod timer;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::config::Config;
use crate::sink::{self, SinkError};
use crate::vault::VaultError;

use self::pid::{PidFileError, PidTracker};
use self::signal::Cancelled;
use self::timer::TimerSpec;

/// Clipboard hold error.
#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("clipboard copy command not configured")]
    CopyDisabled,
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error("failed to locate own executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("failed to spawn hold timer: {0}")]
    SpawnTimer(#[source] std::io::Error),
    #[error("hold timer exited before arming")]
    TimerExited,
    #[error("failed to install SIGTERM handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Source of the secret to copy. Implemented by [`crate::vault::Vault`].
pub trait SecretSource {
    /// `Ok(None)` means the lookup failed in an expected way (no such item)
    /// and the source already reported it.
    fn get_password(&self, item: &str)
    -> impl Future<Output = Result<Option<SecretString>, VaultError>>;
}

/// Result of [`ClipboardHold::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The vault had nothing for the item; nothing was copied.
    NotFound,
    /// Secret copied. `timer` is the pid of the armed clear, if clearing is
    /// configured.
    Copied { timer: Option<u32> },
}

/// Copy-then-clear operation over the configured sinks.
#[derive(Debug, Clone)]
pub struct ClipboardHold {
    copy_cmd: Vec<String>,
    clear_cmd: Vec<String>,
    timeout: Duration,
    pids: PidTracker,
    timer_exe: PathBuf,
    debug: bool,
}

impl ClipboardHold {
    pub fn new(
        copy_cmd: Vec<String>,
        clear_cmd: Vec<String>,
        timeout: Duration,
        runtime_dir: &Path,
        timer_exe: PathBuf,
    ) -> Self {
        Self {
            copy_cmd,
            clear_cmd,
            timeout,
            pids: PidTracker::new(runtime_dir),
            timer_exe,
            debug: false,
        }
    }

    /// Hold wired to `config`, with this binary as the timer executable.
    pub fn from_config(config: &Config, runtime_dir: &Path) -> Result<Self, HoldError> {
        let exe = std::env::current_exe().map_err(HoldError::CurrentExe)?;
        Ok(Self::new(
            config.clipboard_copy_cmd.clone(),
            config.clipboard_clear_cmd.clone(),
            config.clear_timeout(),
            runtime_dir,
            exe,
        )
        .with_debug(config.debug))
    }

    /// Let the timer inherit stderr and log at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn pid_tracker(&self) -> &PidTracker {
        &self.pids
    }

    /// Copy the password for `item` and arm a clear.
    pub async fn execute<S: SecretSource>(
        &self,
        source: &S,
        item: &str,
    ) -> Result<HoldOutcome, HoldError> {
        if self.copy_cmd.is_empty() {
            return Err(HoldError::CopyDisabled);
        }
        tracing::debug!(item, "copy requested");

        let Some(secret) = source.get_password(item).await? else {
            return Ok(HoldOutcome::NotFound);
        };

        self.cancel_pending();

        tracing::debug!(item, "copying to clipboard");
        sink::deliver_copy(&self.copy_cmd, &secret).await?;
        drop(secret);

        if self.clear_cmd.is_empty() {
            tracing::debug!("clear command not configured, no hold armed");
            return Ok(HoldOutcome::Copied { timer: None });
        }

        let spec = TimerSpec {
            pid_file: self.pids.path().to_path_buf(),
            timeout: self.timeout,
            clear_cmd: self.clear_cmd.clone(),
        };
        let pid = timer::spawn_detached(&self.timer_exe, &spec, self.debug).await?;
        Ok(HoldOutcome::Copied { timer: Some(pid) })
    }

    /// SIGTERM the owner of the pending clear, if any. Never fails: a stale
    /// or unreadable pid file must not stop the new copy.
    fn cancel_pending(&self) {
        let pid = match self.pids.read() {
            Ok(Some(pid)) => pid,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable hold-pid file");
                return;
            }
        };
        match signal::cancel(pid) {
            Ok(Cancelled::Signalled) => tracing::debug!(pid, "sent SIGTERM to pending hold timer"),
            Ok(Cancelled::AlreadyGone) => {
                tracing::debug!(pid, "pending hold timer already gone")
            }
            Err(e) => tracing::warn!(pid, error = %e, "failed to cancel pending hold timer"),
        }
    }
}

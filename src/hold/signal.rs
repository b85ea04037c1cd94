//! Cancellation of a pending clear by signal.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Result of a successful [`cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// SIGTERM was delivered.
    Signalled,
    /// No such process. The usual case once a timer has fired and cleaned up.
    AlreadyGone,
}

/// Send SIGTERM to `pid`.
///
/// Fire-and-forget: no acknowledgement is awaited. `ESRCH` is reported as
/// [`Cancelled::AlreadyGone`]; any other errno is returned for the caller to
/// log.
pub fn cancel(pid: u32) -> Result<Cancelled, Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    if raw <= 0 {
        return Err(Errno::EINVAL);
    }
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(Cancelled::Signalled),
        Err(Errno::ESRCH) => Ok(Cancelled::AlreadyGone),
        Err(e) => Err(e),
    }
}

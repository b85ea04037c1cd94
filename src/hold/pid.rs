//! Hold-pid file — the on-disk record of the pending clear.
//!
//! The file's existence is the "a clear is scheduled" flag and its content
//! names the timer process that owns it. There is no other registry: any
//! later `bwx` invocation discovers the pending clear by reading this file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic;

/// File name of the hold-pid file inside the runtime directory.
pub const PID_FILE_NAME: &str = "bw_clear.pid";

/// Hold-pid file error.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("hold-pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file exists but does not hold a usable process id.
    #[error("hold-pid file {path} is corrupt: {content:?}")]
    Corrupt { path: PathBuf, content: String },
}

/// Reads and writes the single hold-pid file.
#[derive(Debug, Clone)]
pub struct PidTracker {
    path: PathBuf,
}

impl PidTracker {
    /// Tracker for `<runtime_dir>/bw_clear.pid`.
    pub fn new(runtime_dir: &Path) -> Self {
        Self::at(runtime_dir.join(PID_FILE_NAME))
    }

    /// Tracker for an explicit file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `pid` as the owner of the pending clear.
    ///
    /// The file is replaced atomically, so a concurrent reader sees either
    /// the old pid or the new one, never a truncated file.
    pub fn write(&self, pid: u32) -> Result<(), PidFileError> {
        atomic::write_atomic(&self.path, pid.to_string().as_bytes())
            .map_err(|source| self.io_error(source))
    }

    /// Pid of the pending clear, or `None` when nothing is scheduled.
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        match raw.trim().parse::<u32>() {
            // Pids above i32::MAX cannot be signalled; 0 would hit our own
            // process group.
            Ok(pid) if pid > 0 && i32::try_from(pid).is_ok() => Ok(Some(pid)),
            _ => Err(PidFileError::Corrupt {
                path: self.path.clone(),
                content: raw,
            }),
        }
    }

    /// Delete the file. Missing is fine.
    pub fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Delete the file only if it still names `pid`.
    ///
    /// Returns whether the file was removed. A corrupt file is left alone;
    /// the next timer overwrites it.
    ///
    /// The read and the unlink are two steps. A successor that renames its
    /// own pid in between loses its record; its clear still fires on
    /// timeout, but a later copy cannot cancel it.
    pub fn remove_if_owned(&self, pid: u32) -> Result<bool, PidFileError> {
        match self.read() {
            Ok(Some(owner)) if owner == pid => {
                self.remove()?;
                Ok(true)
            }
            Ok(_) | Err(PidFileError::Corrupt { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn io_error(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

//! Layered YAML configuration.
//!
//! Every existing file from [`search_paths`] is read in order, then the
//! file given with `--config`; each one overrides the keys it sets. Unknown
//! keys are rejected so a typo cannot silently disable clearing.

use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::unistd::{AccessFlags, access};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Configuration error. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} is not a mapping")]
    NotMapping { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Invalid(#[source] serde_yaml::Error),
    #[error("transient directory not set")]
    NoTransientDir,
    #[error("cannot expand transient directory '{dir}': {message}")]
    Expand { dir: String, message: String },
    #[error("transient directory {path}: {source}")]
    TransientDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transient directory {0} is not a writable directory")]
    NotWritable(PathBuf),
    #[error("command '{0}' not found")]
    CommandNotFound(String),
    #[error("clipboard clear timeout must be positive, got {0}")]
    InvalidTimeout(i64),
}

/// Runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Debug logging, and timer stderr left attached.
    pub debug: bool,
    /// Runtime directory for the session cache and pid file. `~` and `$VAR`
    /// are expanded.
    pub transient_dir: String,
    /// Vault CLI program.
    pub bw_cmd: String,
    /// Copy sink argv; empty disables `copy`.
    pub clipboard_copy_cmd: Vec<String>,
    /// Clear sink argv; empty disables the hold timer.
    pub clipboard_clear_cmd: Vec<String>,
    /// Hold duration in seconds.
    pub clipboard_clear_timeout: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            transient_dir: default_transient_dir(),
            bw_cmd: "bw".to_string(),
            clipboard_copy_cmd: Vec::new(),
            clipboard_clear_cmd: Vec::new(),
            clipboard_clear_timeout: 30,
        }
    }
}

fn default_transient_dir() -> String {
    std::env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| format!("/run/user/{}", nix::unistd::getuid()))
}

/// System and user config files, lowest precedence first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/bwx.yml"), PathBuf::from("/etc/bwx.yaml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("bwx.yml"));
        paths.push(dir.join("bwx.yaml"));
    }
    paths
}

impl Config {
    /// Load from the search path plus `extra`, then validate.
    ///
    /// `extra` must exist; search path files are optional.
    pub fn load(extra: Option<&Path>) -> Result<Self, ConfigError> {
        let mut files: Vec<PathBuf> = search_paths().into_iter().filter(|p| p.is_file()).collect();
        if let Some(extra) = extra {
            files.push(extra.to_path_buf());
        }
        let config = Self::from_files(&files)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `files` in order over the defaults. No validation.
    pub fn from_files(files: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = Mapping::new();
        for path in files {
            tracing::debug!(path = %path.display(), "reading config");
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let value: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            match value {
                Value::Mapping(layer) => merged.extend(layer),
                // An empty file parses as null.
                Value::Null => {}
                _ => return Err(ConfigError::NotMapping { path: path.clone() }),
            }
        }
        serde_yaml::from_value(Value::Mapping(merged)).map_err(ConfigError::Invalid)
    }

    pub fn is_copy_enabled(&self) -> bool {
        !self.clipboard_copy_cmd.is_empty()
    }

    pub fn is_clear_enabled(&self) -> bool {
        !self.clipboard_clear_cmd.is_empty()
    }

    /// Hold duration. Only meaningful after [`Config::validate`].
    pub fn clear_timeout(&self) -> Duration {
        Duration::from_secs(self.clipboard_clear_timeout.max(0).unsigned_abs())
    }

    /// `transient_dir` with `~` and environment variables expanded.
    pub fn runtime_dir(&self) -> Result<PathBuf, ConfigError> {
        if self.transient_dir.trim().is_empty() {
            return Err(ConfigError::NoTransientDir);
        }
        shellexpand::full(&self.transient_dir)
            .map(|dir| PathBuf::from(dir.into_owned()))
            .map_err(|e| ConfigError::Expand {
                dir: self.transient_dir.clone(),
                message: e.to_string(),
            })
    }

    /// Check every external command and create the runtime directory
    /// (mode 0700) if needed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dir = self.runtime_dir()?;
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(|source| ConfigError::TransientDir {
                path: dir.clone(),
                source,
            })?;
        if !dir.is_dir() || access(dir.as_path(), AccessFlags::W_OK | AccessFlags::X_OK).is_err() {
            return Err(ConfigError::NotWritable(dir));
        }

        require_command(&self.bw_cmd)?;
        if let Some(program) = self.clipboard_copy_cmd.first() {
            require_command(program)?;
        }
        if let Some(program) = self.clipboard_clear_cmd.first() {
            require_command(program)?;
        }
        if self.is_clear_enabled() && self.clipboard_clear_timeout <= 0 {
            return Err(ConfigError::InvalidTimeout(self.clipboard_clear_timeout));
        }
        Ok(())
    }
}

fn require_command(program: &str) -> Result<(), ConfigError> {
    which::which(program)
        .map(drop)
        .map_err(|_| ConfigError::CommandNotFound(program.to_string()))
}

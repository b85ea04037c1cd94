//! External vault CLI (`bw`) — secret lookup, unlock and passthrough.
//!
//! Every call is a one-shot child process. The session token reaches the
//! child through its own environment block only; this process's global
//! environment is never modified.

use std::process::Stdio;

use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::hold::SecretSource;
use crate::session::{SESSION_ENV, SessionToken, Unlocker};

/// Vault CLI error.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program} {command}' exited with {status}")]
    Exited {
        program: String,
        command: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("'{program}' printed non-UTF-8 output")]
    InvalidUtf8 { program: String },
}

/// Handle on the vault CLI binary.
#[derive(Debug)]
pub struct Vault {
    program: String,
    session: Option<SessionToken>,
}

impl Vault {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            session: None,
        }
    }

    /// Same vault, with `token` passed to every child it spawns.
    pub fn authenticated(&self, token: SessionToken) -> Self {
        Self {
            program: self.program.clone(),
            session: Some(token),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `bw get password <item>`.
    ///
    /// A non-zero exit is a failed lookup and yields `Ok(None)`; the vault
    /// already explained why on its own stderr.
    pub async fn get_password(&self, item: &str) -> Result<Option<SecretString>, VaultError> {
        let output = self
            .command()
            .args(["get", "password", item])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            tracing::debug!(item, status = %output.status, "vault lookup failed");
            return Ok(None);
        }
        self.secret_from_stdout(output.stdout).map(Some)
    }

    /// `bw unlock --raw`, returning the trimmed token.
    ///
    /// Stdin and stderr stay attached to the terminal so the vault can ask
    /// for the master password.
    pub async fn unlock(&self) -> Result<SecretString, VaultError> {
        tracing::debug!("unlocking vault");
        let output = self
            .command()
            .args(["unlock", "--raw"])
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            return Err(VaultError::Exited {
                program: self.program.clone(),
                command: "unlock",
                status: output.status,
            });
        }
        self.secret_from_stdout(output.stdout)
    }

    /// Command line that hands `args` straight to the vault CLI.
    ///
    /// Returned as a std command so the caller can `exec` it and let the
    /// vault's exit status become ours.
    pub fn passthrough<I, S>(&self, args: I) -> std::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(args);
        if let Some(token) = &self.session {
            cmd.env(SESSION_ENV, token.value().expose_secret());
        }
        cmd
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(token) = &self.session {
            cmd.env(SESSION_ENV, token.value().expose_secret());
        }
        cmd
    }

    /// Trimmed stdout as a secret. The raw buffer is wiped either way.
    fn secret_from_stdout(&self, mut stdout: Vec<u8>) -> Result<SecretString, VaultError> {
        let secret = match std::str::from_utf8(&stdout) {
            Ok(text) => Ok(SecretString::from(text.trim())),
            Err(_) => Err(VaultError::InvalidUtf8 {
                program: self.program.clone(),
            }),
        };
        stdout.zeroize();
        secret
    }

    fn spawn_error(&self, source: std::io::Error) -> VaultError {
        VaultError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl Unlocker for Vault {
    async fn unlock(&self) -> Result<SecretString, VaultError> {
        Vault::unlock(self).await
    }
}

impl SecretSource for Vault {
    async fn get_password(&self, item: &str) -> Result<Option<SecretString>, VaultError> {
        Vault::get_password(self, item).await
    }
}

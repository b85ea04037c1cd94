//! Session token cache — environment, then cache file, then unlock.
//!
//! Unlocking the vault is interactive, so the resulting bearer token is
//! cached in `<runtime-dir>/BW_SESSION` (mode 0600) and reused by later
//! invocations until the vault invalidates it. Staleness is never checked
//! here; a revoked token surfaces as a failing vault call.

use std::fs::{self, Permissions};
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};

use crate::atomic;
use crate::vault::VaultError;

/// Environment variable carrying the session token, and the cache file name.
pub const SESSION_ENV: &str = "BW_SESSION";

const CACHE_MODE: u32 = 0o600;

/// Where a [`SessionToken`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    CacheFile,
    Unlocked,
}

/// Opaque vault bearer token. Zeroized on drop, redacted in `Debug`.
#[derive(Debug)]
pub struct SessionToken {
    value: SecretString,
    source: TokenSource,
}

impl SessionToken {
    pub fn new(value: impl Into<SecretString>, source: TokenSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    pub fn value(&self) -> &SecretString {
        &self.value
    }

    pub fn source(&self) -> TokenSource {
        self.source
    }
}

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("vault unlock failed: {0}")]
    Unlock(#[source] VaultError),
    #[error("vault unlock returned no session token")]
    EmptyToken,
    #[error("session cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Produces a fresh session token. Implemented by [`crate::vault::Vault`].
pub trait Unlocker {
    fn unlock(&self) -> impl Future<Output = Result<SecretString, VaultError>>;
}

/// The persisted session token file.
#[derive(Debug, Clone)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    /// Cache at `<runtime_dir>/BW_SESSION`.
    pub fn new(runtime_dir: &Path) -> Self {
        Self {
            path: runtime_dir.join(SESSION_ENV),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a token, consulting `BW_SESSION` in this process's
    /// environment first.
    pub async fn resolve<U: Unlocker>(&self, unlocker: &U) -> Result<SessionToken, SessionError> {
        self.resolve_with(std::env::var(SESSION_ENV).ok(), unlocker)
            .await
    }

    /// Resolve a token given the inherited environment value.
    ///
    /// First hit wins: `env_token`, then the cache file, then `unlocker`.
    /// A freshly unlocked token is saved before it is returned.
    pub async fn resolve_with<U: Unlocker>(
        &self,
        env_token: Option<String>,
        unlocker: &U,
    ) -> Result<SessionToken, SessionError> {
        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            tracing::debug!("using session token from environment");
            return Ok(SessionToken::new(token.trim(), TokenSource::Environment));
        }

        if let Some(token) = self.load()? {
            tracing::debug!(path = %self.path.display(), "loaded session token from cache");
            return Ok(SessionToken::new(token, TokenSource::CacheFile));
        }

        let unlocked = unlocker.unlock().await.map_err(SessionError::Unlock)?;
        let token = unlocked.expose_secret().trim();
        if token.is_empty() {
            return Err(SessionError::EmptyToken);
        }
        self.save(token)?;
        Ok(SessionToken::new(token, TokenSource::Unlocked))
    }

    /// Cached token, trimmed. Missing or empty file is `None`.
    pub fn load(&self) -> Result<Option<SecretString>, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(mut raw) => {
                let token = raw.trim();
                let token = (!token.is_empty()).then(|| SecretString::from(token));
                raw.zeroize();
                Ok(token)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Persist `token`, readable and writable by the owner only.
    ///
    /// The file is replaced atomically, so a concurrent [`load`] sees the
    /// previous token or the new one, never an empty file. A pre-existing
    /// file with wider permissions does not pass its mode on.
    ///
    /// [`load`]: SessionCache::load
    pub fn save(&self, token: &str) -> Result<(), SessionError> {
        tracing::debug!(path = %self.path.display(), "saving session token");
        atomic::write_atomic(&self.path, token.as_bytes())
            .map_err(|source| self.io_error(source))?;

        let mode = fs::metadata(&self.path)
            .map_err(|source| self.io_error(source))?
            .permissions()
            .mode()
            & 0o777;
        if mode != CACHE_MODE {
            tracing::warn!(
                path = %self.path.display(),
                mode = %format!("{mode:o}"),
                "session cache has unexpected permissions, resetting to 600"
            );
            fs::set_permissions(&self.path, Permissions::from_mode(CACHE_MODE))
                .map_err(|source| self.io_error(source))?;
        }
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

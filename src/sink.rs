//! Sink delivery — the configured copy and clear commands.
//!
//! Both sinks are opaque argv vectors from the configuration (`xclip`,
//! `wl-copy`, `pbcopy`, ...). The copy sink receives the secret on stdin;
//! the clear sink gets no input.

use std::process::Stdio;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Sink command error.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink command is empty")]
    Empty,
    #[error("failed to run sink '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to hand secret to sink '{program}': {source}")]
    Write {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sink '{program}' exited with {status}")]
    Exited {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Pipe `secret` to the copy sink and wait for it to exit.
///
/// Stdin is closed after the write so the sink sees EOF. Stdout is
/// discarded because clipboard tools that fork to serve the selection would
/// otherwise hold it open.
pub async fn deliver_copy(argv: &[String], secret: &SecretString) -> Result<(), SinkError> {
    let (program, args) = argv.split_first().ok_or(SinkError::Empty)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| SinkError::Spawn {
            program: program.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(secret.expose_secret().as_bytes())
            .await
            .map_err(|source| SinkError::Write {
                program: program.clone(),
                source,
            })?;
        // Drop stdin to close the pipe so the sink can finish.
    }

    let status = child.wait().await.map_err(|source| SinkError::Spawn {
        program: program.clone(),
        source,
    })?;
    check_status(program, status)
}

/// Run the clear sink to completion.
pub async fn run_clear(argv: &[String]) -> Result<(), SinkError> {
    let (program, args) = argv.split_first().ok_or(SinkError::Empty)?;

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .await
        .map_err(|source| SinkError::Spawn {
            program: program.clone(),
            source,
        })?;
    check_status(program, status)
}

fn check_status(program: &str, status: std::process::ExitStatus) -> Result<(), SinkError> {
    if status.success() {
        Ok(())
    } else {
        Err(SinkError::Exited {
            program: program.to_string(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: String) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script]
    }

    #[tokio::test]
    async fn copy_sink_receives_secret_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("copied");
        let argv = sh(format!("cat > '{}'", out.display()));

        deliver_copy(&argv, &SecretString::from("s3cr3t")).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&out).await.unwrap(), "s3cr3t");
    }

    #[tokio::test]
    async fn copy_sink_failure_is_reported() {
        let argv = sh("cat > /dev/null; exit 3".into());
        let result = deliver_copy(&argv, &SecretString::from("x")).await;
        assert!(matches!(result, Err(SinkError::Exited { .. })));
    }

    #[tokio::test]
    async fn missing_sink_binary_is_spawn_error() {
        let argv = vec!["/nonexistent/xclip".to_string()];
        let result = deliver_copy(&argv, &SecretString::from("x")).await;
        assert!(matches!(result, Err(SinkError::Spawn { .. })));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        assert!(matches!(run_clear(&[]).await, Err(SinkError::Empty)));
    }

    #[tokio::test]
    async fn clear_sink_runs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("cleared");
        let argv = sh(format!("echo cleared >> '{}'", marker.display()));

        run_clear(&argv).await.unwrap();

        assert_eq!(
            tokio::fs::read_to_string(&marker).await.unwrap(),
            "cleared\n"
        );
    }
}

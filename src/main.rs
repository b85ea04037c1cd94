//! bwx entry point — configuration, logging and command dispatch.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bwx::cli::{self, Cli, Command};
use bwx::config::Config;
use bwx::hold::timer::{self, TimerSpec};
use bwx::hold::{ClipboardHold, HoldOutcome};
use bwx::session::SessionCache;
use bwx::vault::Vault;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match dispatch(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Every arm initialises logging exactly once before it can fail.
async fn dispatch(parsed: Cli) -> Result<ExitCode> {
    let Cli {
        config,
        debug,
        command,
    } = parsed;
    let config = config.as_deref();

    let Some(command) = command else {
        let app = App::load(config, debug)?;
        return exec(app.vault.passthrough(["--help"]));
    };

    match command {
        // The timer runs detached and never reads configuration.
        Command::HoldTimer {
            pid_file,
            timeout,
            clear_cmd,
        } => {
            init_logging(debug);
            let spec = TimerSpec {
                pid_file,
                timeout: Duration::from_secs(timeout),
                clear_cmd,
            };
            let outcome = timer::run(&spec, &mut tokio::io::stdout())
                .await
                .context("hold timer failed")?;
            tracing::debug!(?outcome, "hold timer finished");
            Ok(ExitCode::SUCCESS)
        }
        Command::Unlock => {
            App::load(config, debug)?.authenticate().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Copy { item } => {
            let app = App::load(config, debug)?;
            let item = item.join(" ");
            let hold = ClipboardHold::from_config(&app.config, &app.runtime_dir)?;
            let vault = app.authenticate().await?;
            match hold.execute(&vault, &item).await? {
                HoldOutcome::NotFound => tracing::debug!(item, "nothing copied"),
                HoldOutcome::Copied { timer } => tracing::debug!(item, ?timer, "copied"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Pw { args } => {
            let vault = App::load(config, debug)?.authenticate().await?;
            exec(vault.passthrough(["get", "password"].into_iter().map(String::from).chain(args)))
        }
        Command::External(args) => {
            let app = App::load(config, debug)?;
            let vault = if cli::passthrough_needs_session(&args) {
                app.authenticate().await?
            } else {
                app.vault
            };
            tracing::debug!(program = vault.program(), "passing command through");
            exec(vault.passthrough(args))
        }
    }
}

/// Loaded configuration plus the unauthenticated vault handle.
struct App {
    config: Config,
    runtime_dir: PathBuf,
    vault: Vault,
}

impl App {
    fn load(path: Option<&Path>, debug: bool) -> Result<Self> {
        let config = Config::load(path);
        init_logging(debug || config.as_ref().is_ok_and(|c| c.debug));
        let mut config = config?;
        config.debug |= debug;
        let runtime_dir = config.runtime_dir()?;
        let vault = Vault::new(&config.bw_cmd);
        Ok(Self {
            config,
            runtime_dir,
            vault,
        })
    }

    /// Vault handle carrying a resolved session token.
    async fn authenticate(&self) -> Result<Vault> {
        let token = SessionCache::new(&self.runtime_dir)
            .resolve(&self.vault)
            .await?;
        tracing::debug!(source = ?token.source(), "session ready");
        Ok(self.vault.authenticated(token))
    }
}

/// Replace this process with `cmd`. Only returns on failure.
fn exec(mut cmd: std::process::Command) -> Result<ExitCode> {
    let err = cmd.exec();
    Err(err).with_context(|| format!("failed to run {:?}", cmd.get_program()))
}

fn init_logging(debug: bool) {
    let default = if debug { "bwx=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vault commands that work without an unlocked session.
pub const SESSIONLESS_COMMANDS: [&str; 3] = ["login", "logout", "config"];

#[derive(Debug, Parser)]
#[command(name = "bwx")]
#[command(about = "Bitwarden CLI wrapper with a cached session and a self-clearing clipboard")]
#[command(version)]
#[command(after_help = r#"Any command not listed is passed to the vault CLI with the
session token set, e.g. `bwx list items --search mail`.

FILES:
    /etc/bwx.yml, ~/.config/bwx.yml     configuration (YAML)
    $XDG_RUNTIME_DIR/BW_SESSION         cached session token (0600)
    $XDG_RUNTIME_DIR/bw_clear.pid       pid of the pending clipboard clear"#)]
pub struct Cli {
    /// Extra configuration file, applied after the standard ones
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Unlock the vault and cache the session token
    Unlock,

    /// Copy an item's password, clearing it again after the configured timeout
    #[command(visible_alias = "cp")]
    Copy {
        /// Item name or id; multiple words are joined with spaces
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        item: Vec<String>,
    },

    /// Print an item's password (`get password`)
    Pw {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Detached clipboard clear timer
    #[command(hide = true)]
    HoldTimer {
        #[arg(long)]
        pid_file: PathBuf,
        /// Seconds to wait before clearing
        #[arg(long)]
        timeout: u64,
        /// Clear command argv
        #[arg(last = true, required = true)]
        clear_cmd: Vec<String>,
    },

    #[command(external_subcommand)]
    External(Vec<String>),
}

impl Command {
    /// Whether the command needs a session token before it runs.
    pub fn needs_session(&self) -> bool {
        match self {
            Self::Unlock | Self::Copy { .. } | Self::Pw { .. } => true,
            Self::HoldTimer { .. } => false,
            Self::External(args) => passthrough_needs_session(args),
        }
    }
}

/// Whether a passed-through vault command line needs a session token.
pub fn passthrough_needs_session(args: &[String]) -> bool {
    args.first()
        .is_none_or(|cmd| !SESSIONLESS_COMMANDS.contains(&cmd.as_str()))
}

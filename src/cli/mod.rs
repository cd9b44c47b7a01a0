// Lockbox: CLI Module
//
// Command-line interface using clap derive macros.
// Subcommands: init, validate, store, get, delete, list, health, self-test,
// audit, verify-audit.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

pub use commands::execute;

use crate::config::{self, LockboxConfig, ENV_CONFIG};
use crate::error::LockboxError;

/// Lockbox: tenant-isolated storage for provider API credentials.
#[derive(Parser, Debug)]
#[command(name = "lockbox")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (TOML or JSON). Falls back to LOCKBOX_CONFIG, then development defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database or secrets file for the configured backend.
    Init,

    /// Check the configuration without touching storage.
    Validate,

    /// Store (or replace) a credential.
    Store {
        /// The identity the credential belongs to (e.g., an email address).
        #[arg(long)]
        identity: String,

        /// The provider name (e.g., "anthropic", "openai").
        #[arg(long)]
        provider: String,

        /// The secret value. Read from stdin when omitted, which keeps it out of shell history.
        #[arg(long)]
        value: Option<String>,
    },

    /// Show whether a credential is stored.
    Get {
        #[arg(long)]
        identity: String,

        #[arg(long)]
        provider: String,

        /// Print the plaintext value instead of a redacted summary.
        #[arg(long, default_value = "false")]
        reveal: bool,
    },

    /// Delete a credential.
    Delete {
        #[arg(long)]
        identity: String,

        #[arg(long)]
        provider: String,
    },

    /// List the providers an identity has credentials for.
    List {
        #[arg(long)]
        identity: String,
    },

    /// Report backend health as JSON.
    Health,

    /// Run a store/get/delete round trip with a disposable probe key.
    SelfTest,

    /// Show the audit trail for an identity (relational storage only).
    Audit {
        #[arg(long)]
        identity: String,

        /// Maximum number of entries, newest first.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Verify the audit log hash chain (relational storage only).
    VerifyAudit,
}

/// Default directory for Lockbox data files.
fn data_dir() -> PathBuf {
    let base = dirs_next::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("lockbox")
}

/// Pick the configuration: explicit path, then `LOCKBOX_CONFIG`, then
/// development defaults under the platform data directory.
pub fn resolve_config(path: Option<&Path>) -> Result<LockboxConfig, LockboxError> {
    let from_env = std::env::var_os(ENV_CONFIG).map(PathBuf::from);
    match path.map(Path::to_path_buf).or(from_env) {
        Some(path) => Ok(config::load(&path)?),
        None => Ok(config::defaults(data_dir().join("lockbox.db"))?),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

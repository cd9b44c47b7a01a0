// Lockbox: Configuration Module
//
// Typed configuration for the whole process. The storage section is a tagged
// union on `type`; each variant carries only what its backend needs.
//
//   type = "relational"      -> database path + master key + KDF params
//   type = "file"            -> file path + master key + KDF params
//   type = "client_managed"  -> nothing

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{
    defaults, load, load_from_str, ConfigFormat, ENV_CONFIG, ENV_ENVIRONMENT,
    ENV_MASTER_KEY,
};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::enclave::{KdfParams, MasterSecret};
use crate::telemetry::LogConfig;

/// Master key that ships in the development defaults. Refused outside development.
pub const DEV_MASTER_KEY: &str = "lockbox-development-master-key-do-not-deploy";

/// Where the process is running. Drives how strict validation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl DeploymentEnvironment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl fmt::Display for DeploymentEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        })
    }
}

impl FromStr for DeploymentEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LockboxConfig {
    #[serde(default)]
    pub environment: DeploymentEnvironment,

    pub storage: StorageAdapterConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

impl LockboxConfig {
    /// Development defaults: relational store at `database`, no master key.
    /// `config::defaults` fills the key from the environment or, in
    /// development only, falls back to `DEV_MASTER_KEY`.
    pub fn development(database: PathBuf) -> Self {
        Self {
            environment: DeploymentEnvironment::Development,
            storage: StorageAdapterConfig::Relational(RelationalConfig {
                database: Some(database),
                master_key: None,
                kdf: KdfParams::default(),
                busy_timeout_ms: default_busy_timeout_ms(),
            }),
            logging: LogConfig::default(),
        }
    }
}

/// Backend selection, tagged on `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageAdapterConfig {
    Relational(RelationalConfig),
    File(FileConfig),
    ClientManaged,
}

impl StorageAdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Relational(_) => "relational",
            Self::File(_) => "file",
            Self::ClientManaged => "client_managed",
        }
    }

    /// The master key slot, for backends that have one.
    pub fn master_key_mut(&mut self) -> Option<&mut Option<MasterSecret>> {
        match self {
            Self::Relational(cfg) => Some(&mut cfg.master_key),
            Self::File(cfg) => Some(&mut cfg.master_key),
            Self::ClientManaged => None,
        }
    }
}

/// Embedded relational engine settings.
///
/// Network parameters (`host`, `port`, `user`, `password`, `ssl`) have no
/// meaning for the embedded engine and are ignored when present.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationalConfig {
    /// Path of the database file.
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(
        default,
        alias = "masterKey",
        alias = "encryption_key",
        alias = "encryptionKey"
    )]
    pub master_key: Option<MasterSecret>,

    #[serde(default)]
    pub kdf: KdfParams,

    /// How long a connection waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Single encrypted file settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(
        default,
        alias = "masterKey",
        alias = "encryption_key",
        alias = "encryptionKey"
    )]
    pub master_key: Option<MasterSecret>,

    #[serde(default)]
    pub kdf: KdfParams,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

// Lockbox: Configuration loader
//
// Reads TOML or JSON (chosen by file extension), then applies environment
// overrides. Loading never validates semantics; that is the storage
// factory's job, so operators get every problem listed at once.

use std::path::{Path, PathBuf};

use super::{ConfigError, DeploymentEnvironment, LockboxConfig, DEV_MASTER_KEY};
use crate::enclave::MasterSecret;

/// Path of the config file the binary should read.
pub const ENV_CONFIG: &str = "LOCKBOX_CONFIG";

/// Fills in a master key the file left out.
pub const ENV_MASTER_KEY: &str = "LOCKBOX_MASTER_KEY";

/// Overrides `environment`.
pub const ENV_ENVIRONMENT: &str = "LOCKBOX_ENVIRONMENT";

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                _ => None,
            })
    }
}

/// Load a config file and apply environment overrides.
pub fn load(path: &Path) -> Result<LockboxConfig, ConfigError> {
    let format =
        ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.into()))?;

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.into(),
        source,
    })?;

    let mut config = load_from_str(&raw, format)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    tracing::debug!(
        path = %path.display(),
        backend = config.storage.kind(),
        environment = %config.environment,
        "Configuration loaded"
    );
    Ok(config)
}

/// Development defaults for `database` with environment overrides applied.
pub fn defaults(database: PathBuf) -> Result<LockboxConfig, ConfigError> {
    defaults_with(database, |name| std::env::var(name).ok())
}

/// `LOCKBOX_MASTER_KEY` wins over the shipped development key, which is only
/// filled in when no key was supplied and the environment is development.
pub(crate) fn defaults_with<F>(database: PathBuf, lookup: F) -> Result<LockboxConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LockboxConfig::development(database);
    apply_env_overrides(&mut config, lookup)?;

    if config.environment.is_development() {
        if let Some(slot) = config.storage.master_key_mut() {
            if slot.is_none() {
                tracing::warn!("No master key supplied; using the development key");
                *slot = Some(MasterSecret::new(DEV_MASTER_KEY));
            }
        }
    }
    Ok(config)
}

/// Parse config text without touching the environment.
pub fn load_from_str(raw: &str, format: ConfigFormat) -> Result<LockboxConfig, ConfigError> {
    match format {
        ConfigFormat::Toml => toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string())),
        ConfigFormat::Json => {
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }
}

/// Apply `LOCKBOX_*` overrides. `lookup` is injected so tests don't mutate
/// the process environment.
pub(crate) fn apply_env_overrides<F>(
    config: &mut LockboxConfig,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup(ENV_ENVIRONMENT) {
        config.environment = env
            .parse::<DeploymentEnvironment>()
            .map_err(|reason| ConfigError::Env {
                name: ENV_ENVIRONMENT,
                reason,
            })?;
    }

    if let Some(key) = lookup(ENV_MASTER_KEY).filter(|k| !k.is_empty()) {
        if let Some(slot) = config.storage.master_key_mut() {
            if slot.is_none() {
                *slot = Some(MasterSecret::new(key));
            }
        }
    }

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

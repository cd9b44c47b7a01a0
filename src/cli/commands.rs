// Lockbox: CLI Command Handlers
//
// Each function handles one CLI subcommand. Handlers build the configured
// adapter through the storage factory and talk to it only through
// `StorageAdapter`, except the audit commands, which need the relational
// store's read-side audit operations.

use std::io::Read;

use zeroize::Zeroizing;

use crate::config::LockboxConfig;
use crate::error::LockboxError;
use crate::store::{
    create_storage, test_storage, validate_config, Identity, SelfTestOutcome, Storage,
    StorageAdapter,
};

use super::Commands;

/// Execute the parsed CLI command.
pub async fn execute(command: Commands, config: LockboxConfig) -> Result<(), LockboxError> {
    match command {
        Commands::Init => cmd_init(&config).await,
        Commands::Validate => cmd_validate(&config),
        Commands::Store {
            identity,
            provider,
            value,
        } => cmd_store(&config, identity, provider, value).await,
        Commands::Get {
            identity,
            provider,
            reveal,
        } => cmd_get(&config, identity, provider, reveal).await,
        Commands::Delete { identity, provider } => cmd_delete(&config, identity, provider).await,
        Commands::List { identity } => cmd_list(&config, identity).await,
        Commands::Health => cmd_health(&config).await,
        Commands::SelfTest => cmd_self_test(&config).await,
        Commands::Audit { identity, limit } => cmd_audit(&config, identity, limit).await,
        Commands::VerifyAudit => cmd_verify_audit(&config).await,
    }
}

// ─── Init / Validate ─────────────────────────────────────────────────────────

async fn cmd_init(config: &LockboxConfig) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;

    println!("✓ Lockbox initialized successfully");
    println!("  Backend:     {}", storage.kind());
    println!("  Environment: {}", config.environment);
    match &storage {
        Storage::Relational(store) => println!("  Database:    {}", store.path().display()),
        Storage::File(adapter) => println!("  File:        {}", adapter.path().display()),
        Storage::ClientManaged(_) => println!("  Credentials are supplied by callers per request"),
    }
    println!();
    println!("Next: store a credential with `lockbox store --identity <who> --provider <name>`");

    Ok(())
}

fn cmd_validate(config: &LockboxConfig) -> Result<(), LockboxError> {
    let errors = validate_config(config);
    if errors.is_empty() {
        println!("✓ Configuration is valid ({} storage, {})", config.storage.kind(), config.environment);
        return Ok(());
    }

    println!("Configuration problems ({}):", errors.len());
    for error in &errors {
        println!("  - {}", error);
    }
    Err(LockboxError::Other(format!(
        "configuration has {} problem(s)",
        errors.len()
    )))
}

// ─── Secrets ─────────────────────────────────────────────────────────────────

/// Read the secret from stdin, dropping one trailing newline.
fn read_value_from_stdin() -> Result<Zeroizing<String>, LockboxError> {
    let mut raw = Zeroizing::new(String::new());
    std::io::stdin().read_to_string(&mut raw)?;
    let trimmed = raw.trim_end_matches(['\r', '\n']).len();
    raw.truncate(trimmed);
    Ok(raw)
}

async fn cmd_store(
    config: &LockboxConfig,
    identity: String,
    provider: String,
    value: Option<String>,
) -> Result<(), LockboxError> {
    let value = match value {
        Some(v) => Zeroizing::new(v),
        None => read_value_from_stdin()?,
    };

    let storage = create_storage(config).await?;
    storage
        .store_secret(&Identity::new(identity), &provider, &value)
        .await?;

    println!("✓ Credential stored");
    println!("  Provider: {}", provider);
    Ok(())
}

async fn cmd_get(
    config: &LockboxConfig,
    identity: String,
    provider: String,
    reveal: bool,
) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;

    match storage.get_secret(&Identity::new(identity), &provider).await? {
        Some(value) if reveal => println!("{}", value.as_str()),
        Some(value) => {
            println!("Credential found:\n");
            println!("  Provider: {}", provider);
            println!("  Secret:   [REDACTED] ({} chars)", value.chars().count());
        }
        None => println!("No credential stored for provider: {}", provider),
    }
    Ok(())
}

async fn cmd_delete(
    config: &LockboxConfig,
    identity: String,
    provider: String,
) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;

    if storage
        .delete_secret(&Identity::new(identity), &provider)
        .await?
    {
        println!("✓ Credential for {} deleted", provider);
    } else {
        println!("No credential stored for provider: {}", provider);
    }
    Ok(())
}

async fn cmd_list(config: &LockboxConfig, identity: String) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;
    let providers = storage.list_providers(&Identity::new(identity)).await?;

    if providers.is_empty() {
        println!("No credentials stored yet.");
        return Ok(());
    }

    println!("Stored providers ({}):\n", providers.len());
    for provider in &providers {
        println!("  {}", provider);
    }
    Ok(())
}

// ─── Health / Self-test ──────────────────────────────────────────────────────

async fn cmd_health(config: &LockboxConfig) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;
    let report = storage.health_check().await;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| LockboxError::Other(format!("cannot render health report: {}", e)))?;
    println!("{}", json);

    if report.is_healthy() {
        Ok(())
    } else {
        Err(LockboxError::Other("storage is unhealthy".to_string()))
    }
}

async fn cmd_self_test(config: &LockboxConfig) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;

    match test_storage(&storage).await {
        SelfTestOutcome::Passed => {
            println!("✓ Self-test passed ({} storage)", storage.kind());
            Ok(())
        }
        SelfTestOutcome::Unsupported => {
            println!("Self-test skipped: {} storage keeps no secrets", storage.kind());
            Ok(())
        }
        SelfTestOutcome::Failed { stage, reason } => Err(LockboxError::Other(format!(
            "self-test failed at {}: {}",
            stage, reason
        ))),
    }
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn audit_unavailable(storage: &Storage) -> LockboxError {
    LockboxError::Other(format!(
        "{} storage keeps no audit trail; use relational storage",
        storage.kind()
    ))
}

async fn cmd_audit(config: &LockboxConfig, identity: String, limit: u32) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;
    let store = storage
        .as_relational()
        .ok_or_else(|| audit_unavailable(&storage))?;

    let records = store.audit_trail(&Identity::new(identity.clone()), limit).await?;
    if records.is_empty() {
        println!("No audit entries for: {}", identity);
        return Ok(());
    }

    println!("Audit Log for: {}", identity);
    println!("{:-<80}", "");
    for record in records {
        println!("{}", record);
    }
    println!("{:-<80}", "");
    Ok(())
}

async fn cmd_verify_audit(config: &LockboxConfig) -> Result<(), LockboxError> {
    let storage = create_storage(config).await?;
    let store = storage
        .as_relational()
        .ok_or_else(|| audit_unavailable(&storage))?;

    let report = store.verify_audit_chain().await?;
    match report.first_broken_id {
        None => {
            println!("✓ Audit chain intact ({} entries)", report.records_checked);
            Ok(())
        }
        Some(id) => Err(LockboxError::Other(format!(
            "audit chain broken at entry {} ({} entries checked)",
            id, report.records_checked
        ))),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentEnvironment, RelationalConfig, StorageAdapterConfig};
    use crate::enclave::{KdfParams, MasterSecret};
    use crate::telemetry::LogConfig;

    fn relational_config(dir: &std::path::Path) -> LockboxConfig {
        LockboxConfig {
            environment: DeploymentEnvironment::Development,
            storage: StorageAdapterConfig::Relational(RelationalConfig {
                database: Some(dir.join("lockbox.db")),
                master_key: Some(MasterSecret::new(
                    "cli-test-master-secret-0123456789-abcdefghij",
                )),
                kdf: KdfParams::fast(),
                busy_timeout_ms: 5_000,
            }),
            logging: LogConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_store_get_delete_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = relational_config(dir.path());

        execute(Commands::Init, config.clone()).await.unwrap();
        execute(
            Commands::Store {
                identity: "alice@x.com".into(),
                provider: "anthropic".into(),
                value: Some("sk-ant-AAAA".into()),
            },
            config.clone(),
        )
        .await
        .unwrap();

        let storage = create_storage(&config).await.unwrap();
        let value = storage
            .get_secret(&Identity::new("alice@x.com"), "anthropic")
            .await
            .unwrap();
        assert_eq!(value.unwrap().as_str(), "sk-ant-AAAA");

        execute(
            Commands::Delete {
                identity: "alice@x.com".into(),
                provider: "anthropic".into(),
            },
            config.clone(),
        )
        .await
        .unwrap();
        execute(Commands::VerifyAudit, config.clone()).await.unwrap();
        execute(Commands::SelfTest, config).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = relational_config(dir.path());
        if let StorageAdapterConfig::Relational(rel) = &mut config.storage {
            rel.database = None;
        }
        assert!(execute(Commands::Validate, config).await.is_err());
    }

    #[tokio::test]
    async fn test_audit_requires_relational_storage() {
        let config = LockboxConfig {
            storage: StorageAdapterConfig::ClientManaged,
            ..relational_config(std::path::Path::new("/unused"))
        };
        let err = execute(Commands::VerifyAudit, config).await.unwrap_err();
        assert!(err.to_string().contains("audit trail"));
    }
}

// Lockbox: Store data models
//
// SECURITY: plaintext secret values never live in these types. `SecretRow`
// holds only the sealed blob, and even that is kept out of Debug output.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::tenant::TenantId;

/// Longest identity accepted (RFC 5321 path limit).
pub const MAX_IDENTITY_LEN: usize = 320;

/// Longest provider name accepted.
pub const MAX_PROVIDER_LEN: usize = 64;

/// Largest secret value accepted, in bytes.
pub const MAX_SECRET_LEN: usize = 16 * 1024;

/// Operations recorded in logs and in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    Store,
    Get,
    Delete,
    List,
    HealthCheck,
    AuditTrail,
    VerifyAudit,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Store => "store",
            Self::Get => "get",
            Self::Delete => "delete",
            Self::List => "list",
            Self::HealthCheck => "health_check",
            Self::AuditTrail => "audit_trail",
            Self::VerifyAudit => "verify_audit",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped metadata about the caller, recorded in the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// The external identity a request is made on behalf of.
///
/// The raw string is kept for display and audit only. Access decisions use
/// the derived [`TenantId`] exclusively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    raw: String,
    client_meta: Option<ClientMeta>,
}

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            client_meta: None,
        }
    }

    pub fn with_client_meta(mut self, meta: ClientMeta) -> Self {
        self.client_meta = Some(meta);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn client_meta(&self) -> Option<&ClientMeta> {
        self.client_meta.as_ref()
    }

    pub fn tenant_id(&self) -> TenantId {
        TenantId::resolve(&self.raw)
    }

    /// Validate and resolve in one step.
    pub fn resolve(&self) -> Result<TenantId, StoreError> {
        let trimmed = self.raw.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Validation("identity must not be empty".into()));
        }
        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(StoreError::Validation(format!(
                "identity exceeds {} bytes",
                MAX_IDENTITY_LEN
            )));
        }
        Ok(self.tenant_id())
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Identity {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// Provider names: `[a-z0-9][a-z0-9_-]{0,63}`.
pub fn validate_provider(provider: &str) -> Result<(), StoreError> {
    let valid_chars = provider
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    let valid_start = provider
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());

    if provider.is_empty() || provider.len() > MAX_PROVIDER_LEN || !valid_chars || !valid_start {
        return Err(StoreError::Validation(format!(
            "provider must match [a-z0-9][a-z0-9_-]{{0,{}}}",
            MAX_PROVIDER_LEN - 1
        )));
    }
    Ok(())
}

/// Secret values must be non-empty and bounded. The value itself is never echoed.
pub fn validate_value(value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation("secret value must not be empty".into()));
    }
    if value.len() > MAX_SECRET_LEN {
        return Err(StoreError::Validation(format!(
            "secret value exceeds {} bytes",
            MAX_SECRET_LEN
        )));
    }
    Ok(())
}

/// Storage key for a provider's credential.
pub fn secret_key(provider: &str) -> String {
    format!("{}_api_key", provider)
}

/// A persisted secret row. Holds ciphertext only.
#[derive(Clone)]
pub struct SecretRow {
    pub tenant_id: TenantId,
    pub secret_key: String,
    pub encrypted_value: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for SecretRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRow")
            .field("tenant_id", &self.tenant_id)
            .field("secret_key", &self.secret_key)
            .field("encrypted_value", &"[ENCRYPTED]")
            .field("provider", &self.provider)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub identity: String,
    pub operation: Operation,
    pub provider: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub client_meta: Option<ClientMeta>,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} by '{}' ({})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.operation,
            self.provider.as_deref().unwrap_or("*"),
            self.identity,
            if self.success { "ok" } else { "failed" }
        )?;
        if let Some(msg) = &self.error_message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

// ─── Test fixtures ───────────────────────────────────────────────────────────

/// Randomized `(identity, provider, value)` triples shared by backend tests.
#[cfg(test)]
pub(crate) mod samples {
    use rand::Rng;

    use super::{MAX_PROVIDER_LEN, MAX_SECRET_LEN};

    /// Value characters. No hex digits and no `:`, so a value can only show
    /// up inside an `iv:tag:ct` blob if it was written in the clear.
    const VALUE_CHARS: &[char] = &[
        'g', 'k', 'q', 'z', 'G', 'K', 'Q', 'Z', '-', '_', '!', ' ', '~', 'é', 'ß', 'ж', 'Ω', '中',
        '文', '🔑', '✓',
    ];

    const ASCII_FILL: &[char] = &['g', 'h', 'x', 'y', 'Z', '_'];

    pub(crate) struct Case {
        pub identity: String,
        pub provider: String,
        pub value: String,
    }

    /// A value of exactly `bytes` UTF-8 bytes.
    pub(crate) fn value_of_len(rng: &mut impl Rng, bytes: usize) -> String {
        let mut out = String::with_capacity(bytes);
        while out.len() < bytes {
            let c = VALUE_CHARS[rng.random_range(0..VALUE_CHARS.len())];
            if out.len() + c.len_utf8() <= bytes {
                out.push(c);
            } else {
                out.push(ASCII_FILL[rng.random_range(0..ASCII_FILL.len())]);
            }
        }
        out
    }

    fn lowercase_word(rng: &mut impl Rng, len: usize) -> String {
        (0..len).map(|_| rng.random_range(b'a'..=b'z') as char).collect()
    }

    fn provider(rng: &mut impl Rng) -> String {
        const TAIL: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_-";
        let len = rng.random_range(1..=MAX_PROVIDER_LEN);
        let mut out = String::with_capacity(len);
        out.push(rng.random_range(b'a'..=b'z') as char);
        for _ in 1..len {
            out.push(TAIL[rng.random_range(0..TAIL.len())] as char);
        }
        out
    }

    fn case(rng: &mut impl Rng, value_len: usize) -> Case {
        let local_len = rng.random_range(1..24);
        let domain_len = rng.random_range(2..12);
        Case {
            identity: format!(
                "{}@{}.com",
                lowercase_word(rng, local_len),
                lowercase_word(rng, domain_len)
            ),
            provider: provider(rng),
            value: value_of_len(rng, value_len),
        }
    }

    /// Boundary lengths (1 byte, `MAX_SECRET_LEN`) followed by `random`
    /// cases of mixed-width UTF-8.
    pub(crate) fn cases(random: usize) -> Vec<Case> {
        let mut rng = rand::rng();
        let mut out = vec![case(&mut rng, 1), case(&mut rng, MAX_SECRET_LEN)];
        for _ in 0..random {
            let len = rng.random_range(2..=512);
            out.push(case(&mut rng, len));
        }
        out
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_suffix() {
        assert_eq!(secret_key("anthropic"), "anthropic_api_key");
    }

    #[test]
    fn test_provider_validation() {
        for ok in ["anthropic", "openai", "azure-openai", "x", "google_ai", "3d"] {
            assert!(validate_provider(ok).is_ok(), "{} should be accepted", ok);
        }
        let too_long = "a".repeat(MAX_PROVIDER_LEN + 1);
        for bad in ["", "OpenAI", "a:b", "-lead", "_lead", "has space", too_long.as_str()] {
            assert!(
                matches!(validate_provider(bad), Err(StoreError::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_value_validation_never_echoes_value() {
        assert!(validate_value("sk-1").is_ok());
        assert!(matches!(validate_value(""), Err(StoreError::Validation(_))));

        assert!(validate_value(&"s".repeat(MAX_SECRET_LEN)).is_ok());
        assert!(validate_value(&samples::value_of_len(&mut rand::rng(), MAX_SECRET_LEN)).is_ok());

        let huge = "s".repeat(MAX_SECRET_LEN + 1);
        let err = validate_value(&huge).unwrap_err();
        assert!(!err.to_string().contains("sss"));
    }

    #[test]
    fn test_sample_cases_are_valid_and_sized() {
        let cases = samples::cases(16);
        assert_eq!(cases[0].value.len(), 1);
        assert_eq!(cases[1].value.len(), MAX_SECRET_LEN);
        for case in &cases {
            assert!(Identity::new(case.identity.as_str()).resolve().is_ok());
            assert!(validate_provider(&case.provider).is_ok(), "{}", case.provider);
            assert!(validate_value(&case.value).is_ok());
        }
    }

    #[test]
    fn test_identity_validation() {
        assert!(Identity::new("   ").resolve().is_err());
        assert!(Identity::new("x".repeat(MAX_IDENTITY_LEN + 1)).resolve().is_err());
        assert_eq!(
            Identity::new(" Alice@X.com ").resolve().unwrap(),
            TenantId::resolve("alice@x.com")
        );
    }

    #[test]
    fn test_secret_row_debug_hides_ciphertext() {
        let row = SecretRow {
            tenant_id: TenantId::resolve("a@x.com"),
            secret_key: secret_key("openai"),
            encrypted_value: "deadbeef:cafe:f00d".to_string(),
            provider: "openai".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let shown = format!("{:?}", row);
        assert!(!shown.contains("deadbeef"));
        assert!(shown.contains("[ENCRYPTED]"));
    }
}

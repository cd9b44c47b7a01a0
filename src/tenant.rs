// Lockbox: Tenant identity resolution
//
// Maps an external identity (usually an email address) to an opaque tenant
// ID: lowercase hex SHA-256 over a domain-separated, normalized identity.
// Normalization is trim + lowercase and nothing else, so punctuation and
// inner whitespace always stay significant.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain separator so tenant IDs can never be confused with other hashes.
const TENANT_DOMAIN: &[u8] = b"lockbox:tenant:v1\0";

/// Opaque, stable tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Resolve the tenant for an external identity.
    pub fn resolve(identity: &str) -> Self {
        let normalized = normalize(identity);
        let mut hasher = Sha256::new();
        hasher.update(TENANT_DOMAIN);
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    /// Wrap a value read back from storage.
    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The canonical form an identity is hashed in.
pub fn normalize(identity: &str) -> String {
    identity.trim().to_lowercase()
}

/// Free-function form of [`TenantId::resolve`].
pub fn resolve(identity: &str) -> TenantId {
    TenantId::resolve(identity)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

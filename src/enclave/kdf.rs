// Lockbox: Working key derivation
//
// The operator supplies a master secret through configuration. It is never
// used as a cipher key directly: Argon2id stretches it into a 32-byte data
// key, salted with a deterministic domain label so the same secret always
// yields the same key across restarts.
//
// Flow:
//   1. `MasterSecret::check_strength()` rejects short or low-variety secrets
//   2. `derive_key()` runs Argon2id and returns a zeroizing `DataKey`

use std::collections::HashSet;
use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Length of the derived data key in bytes (256-bit for AES-256).
pub const DERIVED_KEY_LEN: usize = 32;

/// Shortest master secret accepted at startup.
pub const MIN_MASTER_SECRET_LEN: usize = 32;

/// Minimum number of distinct byte values in a master secret.
const MIN_DISTINCT_BYTES: usize = 8;

/// Domain label mixed into the Argon2id salt.
const SALT_LABEL: &str = "lockbox::data-key::v1";

// Argon2id defaults: m=65536 (64 MiB), t=3, p=4
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

// ─── Master secret ───────────────────────────────────────────────────────────

/// Operator-supplied root secret. Zeroized on drop, never printed.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
#[serde(transparent)]
pub struct MasterSecret(String);

impl MasterSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Reject secrets that are too short or too repetitive to be a real key.
    pub fn check_strength(&self) -> Result<(), CryptoError> {
        let bytes = self.0.as_bytes();
        if bytes.len() < MIN_MASTER_SECRET_LEN {
            return Err(CryptoError::InsufficientLength(
                bytes.len(),
                MIN_MASTER_SECRET_LEN,
            ));
        }

        let distinct = bytes.iter().collect::<HashSet<_>>().len();
        if distinct < MIN_DISTINCT_BYTES {
            return Err(CryptoError::InsufficientEntropy(distinct, MIN_DISTINCT_BYTES));
        }

        Ok(())
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

// ─── KDF parameters ──────────────────────────────────────────────────────────

/// Argon2id cost parameters plus an optional deployment-specific salt.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    #[serde(default = "default_m_cost")]
    pub m_cost_kib: u32,
    #[serde(default = "default_t_cost")]
    pub t_cost: u32,
    #[serde(default = "default_p_cost")]
    pub p_cost: u32,
    #[serde(default)]
    pub salt: Option<String>,
}

fn default_m_cost() -> u32 {
    ARGON2_M_COST
}

fn default_t_cost() -> u32 {
    ARGON2_T_COST
}

fn default_p_cost() -> u32 {
    ARGON2_P_COST
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost_kib: ARGON2_M_COST,
            t_cost: ARGON2_T_COST,
            p_cost: ARGON2_P_COST,
            salt: None,
        }
    }
}

impl KdfParams {
    /// Salt = SHA-256(label || "::" || configured salt)
    fn build_salt(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(SALT_LABEL.as_bytes());
        hasher.update(b"::");
        hasher.update(self.salt.as_deref().unwrap_or_default().as_bytes());
        hasher.finalize().into()
    }

    /// Cheap parameters so unit tests don't spend seconds in Argon2.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            m_cost_kib: 256,
            t_cost: 1,
            p_cost: 1,
            salt: None,
        }
    }
}

// ─── Data key ────────────────────────────────────────────────────────────────

/// The 32-byte working key used by the envelope. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey(Zeroizing<[u8; DERIVED_KEY_LEN]>);

impl DataKey {
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; DERIVED_KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Derive the data key from the master secret with Argon2id.
pub fn derive_key(secret: &MasterSecret, params: &KdfParams) -> Result<DataKey, CryptoError> {
    secret.check_strength()?;

    let argon_params = Params::new(
        params.m_cost_kib,
        params.t_cost,
        params.p_cost,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| CryptoError::Derivation(format!("invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    argon2
        .hash_password_into(
            secret.expose().as_bytes(),
            &params.build_salt(),
            key.as_mut_slice(),
        )
        .map_err(|e| CryptoError::Derivation(format!("Argon2id hash failed: {}", e)))?;

    tracing::debug!("Data key derived");
    Ok(DataKey(key))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

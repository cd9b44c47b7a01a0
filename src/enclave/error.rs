// Lockbox: Enclave error types
//
// None of these variants carry key material, plaintext or ciphertext.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag mismatch or a malformed blob. Fatal, never retried.
    #[error("integrity check failed")]
    Integrity,

    #[error("encryption failed")]
    Encryption,

    #[error("key derivation error: {0}")]
    Derivation(String),

    #[error("master secret too short ({0} bytes, need at least {1})")]
    InsufficientLength(usize, usize),

    #[error("master secret has insufficient entropy ({0} distinct bytes, need at least {1})")]
    InsufficientEntropy(usize, usize),
}

// Lockbox: Enclave Module
//
// Key derivation and authenticated encryption. Nothing in here performs I/O:
// the operator secret comes in through configuration, the derived working key
// stays in zeroizing memory, and every blob is AES-256-GCM sealed.

mod envelope;
mod error;
mod kdf;

pub use envelope::{decrypt, encrypt, EnvelopeParts, IV_LEN, TAG_LEN};
pub use error::CryptoError;
pub use kdf::{derive_key, DataKey, KdfParams, MasterSecret, DERIVED_KEY_LEN, MIN_MASTER_SECRET_LEN};

// Lockbox: Crypto envelope
//
// AES-256-GCM with a fresh 16-byte IV per call. A sealed value is stored as
// `hex(iv):hex(tag):hex(ciphertext)`. The tag is checked before any plaintext
// is released; every malformed or tampered blob maps to `CryptoError::Integrity`.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::RngCore;
use zeroize::Zeroizing;

use super::{CryptoError, DataKey};

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Decoded pieces of a sealed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeParts {
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EnvelopeParts {
    /// Parse `iv:tag:ciphertext`. Anything else is an integrity failure.
    pub fn parse(blob: &str) -> Result<Self, CryptoError> {
        let mut parts = blob.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(ct_hex), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Integrity);
        };

        let mut iv = [0u8; IV_LEN];
        hex::decode_to_slice(iv_hex, &mut iv).map_err(|_| CryptoError::Integrity)?;
        let mut tag = [0u8; TAG_LEN];
        hex::decode_to_slice(tag_hex, &mut tag).map_err(|_| CryptoError::Integrity)?;
        let ciphertext = hex::decode(ct_hex).map_err(|_| CryptoError::Integrity)?;

        Ok(Self {
            iv,
            tag,
            ciphertext,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }
}

/// Seal `plaintext` under `key`.
pub fn encrypt(plaintext: &[u8], key: &DataKey) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::Encryption)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok(EnvelopeParts {
        iv,
        tag: tag_bytes,
        ciphertext: buffer,
    }
    .encode())
}

/// Open a blob produced by [`encrypt`]. Fails closed on any mismatch.
pub fn decrypt(blob: &str, key: &DataKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let parts = EnvelopeParts::parse(blob)?;
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut buffer = Zeroizing::new(parts.ciphertext);
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&parts.iv),
            b"",
            buffer.as_mut_slice(),
            Tag::<U16>::from_slice(&parts.tag),
        )
        .map_err(|_| CryptoError::Integrity)?;

    Ok(buffer)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

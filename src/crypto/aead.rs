//! AES-256-GCM helpers shared by the fragment encryptor and manifest sealing.
//!
//! Every sealed value carries its own random 96-bit nonce. The tag is kept
//! separately so callers can persist it as an explicit MAC field.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// GCM tag length in bytes
pub const TAG_LEN: usize = 16;

/// Errors from the AEAD layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AeadError {
    /// Tag check failed: wrong key, wrong AAD, or tampered data
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Random number generation failed")]
    RandomFailed,
}

/// Ciphertext with its nonce and detached tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Fill a fresh array from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], AeadError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; N];
    rng.fill(&mut bytes).map_err(|_| AeadError::RandomFailed)?;
    Ok(bytes)
}

fn less_safe_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, AeadError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|e| AeadError::EncryptionFailed(format!("Key creation failed: {}", e)))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
pub fn seal(key: &[u8; KEY_LEN], aad: &[u8], plaintext: &[u8]) -> Result<SealedBlob, AeadError> {
    let key = less_safe_key(key)?;
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut ciphertext = plaintext.to_vec();
    let tag = key
        .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut ciphertext)
        .map_err(|e| AeadError::EncryptionFailed(format!("Seal failed: {}", e)))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(SealedBlob {
        nonce: nonce_bytes,
        ciphertext,
        tag: tag_bytes,
    })
}

/// Decrypt a sealed blob. Fails closed on any mismatch.
pub fn open(key: &[u8; KEY_LEN], aad: &[u8], sealed: &SealedBlob) -> Result<Vec<u8>, AeadError> {
    let key = less_safe_key(key)?;
    let nonce = Nonce::assume_unique_for_key(sealed.nonce);

    let mut buffer = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
    buffer.extend_from_slice(&sealed.ciphertext);
    buffer.extend_from_slice(&sealed.tag);

    let plaintext_len = key
        .open_in_place(nonce, Aad::from(aad), &mut buffer)
        .map_err(|_| AeadError::AuthenticationFailed)?
        .len();
    buffer.truncate(plaintext_len);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [7u8; KEY_LEN];
        let sealed = seal(&key, b"context", b"hello fragment").unwrap();
        assert_ne!(sealed.ciphertext, b"hello fragment");
        assert_eq!(open(&key, b"context", &sealed).unwrap(), b"hello fragment");
    }

    #[test]
    fn test_open_rejects_wrong_aad() {
        let key = [7u8; KEY_LEN];
        let sealed = seal(&key, b"context-a", b"payload").unwrap();
        assert_eq!(
            open(&key, b"context-b", &sealed),
            Err(AeadError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_open_rejects_tampered_tag() {
        let key = [7u8; KEY_LEN];
        let mut sealed = seal(&key, b"", b"payload").unwrap();
        sealed.tag[0] ^= 0x80;
        assert_eq!(open(&key, b"", &sealed), Err(AeadError::AuthenticationFailed));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = [1u8; KEY_LEN];
        let a = seal(&key, b"", b"same").unwrap();
        let b = seal(&key, b"", b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}

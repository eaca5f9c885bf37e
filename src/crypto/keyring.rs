//! Service key derivation from a BIP-39 mnemonic
//!
//! All long-lived keys of a mirrorshard deployment are derived from the
//! operator's 24-word BIP-39 mnemonic using HKDF-SHA256 with domain separation.
//!
//! ## Key Hierarchy
//!
//! ```text
//! BIP-39 Mnemonic (24 words)
//!         │
//!         ▼
//! bip39::Mnemonic::to_seed("")  → [u8; 64]
//!         │
//!         ▼
//! HKDF-SHA256(salt="mirrorshard-master-v1", seed)
//!         │
//!         ├─► HKDF expand("manifest-sealing")   → seals per-node fragment keys
//!         └─► HKDF expand("opening-sealing")    → seals commitment openings
//! ```
//!
//! Per-node fragment keys are random, never derived: compromising the
//! mnemonic alone yields nothing without the manifests, and a manifest alone
//! yields nothing without the mnemonic.

use super::aead::{self, AeadError, SealedBlob};
use bip39::{Language, Mnemonic};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Domain separation salt for master key derivation (versioned for rotation)
const MASTER_SALT: &[u8] = b"mirrorshard-master-v1";

/// HKDF info strings for purpose-specific key derivation
mod purposes {
    pub const MANIFEST_SEALING: &[u8] = b"manifest-sealing";
    pub const OPENING_SEALING: &[u8] = b"opening-sealing";
}

/// Errors that can occur during key derivation or sealing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    /// Invalid BIP-39 mnemonic
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// HKDF expansion failed (should never happen with valid lengths)
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Sealing failed: {0}")]
    Sealing(#[from] AeadError),
}

/// Generate a fresh 24-word mnemonic (256 bits of entropy).
pub fn generate_mnemonic() -> Result<String, KeyringError> {
    let mut entropy = aead::random_bytes::<32>().map_err(KeyringError::Sealing)?;
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| KeyringError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    Ok(mnemonic?.to_string())
}

/// Keyring holding the service's derived keys.
///
/// Keys are derived once at construction and zeroized on drop. The mnemonic
/// itself is not retained.
pub struct ServiceKeyring {
    /// Key epoch (derivation generation), default 1
    epoch: u64,

    /// Seals per-node fragment keys inside manifests
    manifest_sealing_key: [u8; 32],

    /// Seals Pedersen commitment openings inside manifests
    opening_sealing_key: [u8; 32],
}

impl Drop for ServiceKeyring {
    fn drop(&mut self) {
        self.manifest_sealing_key.zeroize();
        self.opening_sealing_key.zeroize();
    }
}

impl ServiceKeyring {
    /// Create a keyring from a BIP-39 mnemonic phrase.
    ///
    /// # Errors
    ///
    /// - `InvalidMnemonic`: the phrase fails BIP-39 validation
    pub fn from_mnemonic(mnemonic: &str) -> Result<Self, KeyringError> {
        let parsed =
            Mnemonic::parse(mnemonic).map_err(|e| KeyringError::InvalidMnemonic(e.to_string()))?;

        let mut seed = parsed.to_seed("");
        let keyring = Self::from_seed(&seed);
        seed.zeroize();
        keyring
    }

    /// Create a keyring directly from seed material.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyringError> {
        let hkdf = Hkdf::<Sha256>::new(Some(MASTER_SALT), seed);

        Ok(Self {
            epoch: 1,
            manifest_sealing_key: Self::derive_key(&hkdf, purposes::MANIFEST_SEALING)?,
            opening_sealing_key: Self::derive_key(&hkdf, purposes::OPENING_SEALING)?,
        })
    }

    fn derive_key(hkdf: &Hkdf<Sha256>, info: &[u8]) -> Result<[u8; 32], KeyringError> {
        let mut key = [0u8; 32];
        hkdf.expand(info, &mut key)
            .map_err(|e| KeyringError::DerivationFailed(format!("{:?}", e)))?;
        Ok(key)
    }

    /// Get the key epoch (derivation generation).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Seal a per-node fragment key for storage in a manifest.
    ///
    /// `context` binds the sealed key to its (record, node, epoch) slot so a
    /// sealed key copied into another manifest entry does not open.
    pub fn seal_node_key(&self, context: &[u8], key: &[u8]) -> Result<SealedBlob, KeyringError> {
        Ok(aead::seal(&self.manifest_sealing_key, context, key)?)
    }

    /// Open a sealed per-node fragment key.
    pub fn open_node_key(
        &self,
        context: &[u8],
        sealed: &SealedBlob,
    ) -> Result<Vec<u8>, KeyringError> {
        Ok(aead::open(&self.manifest_sealing_key, context, sealed)?)
    }

    /// Seal commitment openings for storage in a manifest.
    pub fn seal_opening(&self, context: &[u8], opening: &[u8]) -> Result<SealedBlob, KeyringError> {
        Ok(aead::seal(&self.opening_sealing_key, context, opening)?)
    }

    /// Open sealed commitment openings.
    pub fn open_opening(
        &self,
        context: &[u8],
        sealed: &SealedBlob,
    ) -> Result<Vec<u8>, KeyringError> {
        Ok(aead::open(&self.opening_sealing_key, context, sealed)?)
    }
}

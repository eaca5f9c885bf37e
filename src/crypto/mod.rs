/// Cryptographic primitives shared across mirrorshard
///
/// This module implements:
/// - AES-256-GCM sealing with detached tags (aead)
/// - Unified key derivation from a BIP-39 mnemonic (keyring)
pub mod aead;
pub mod keyring;

pub use aead::{AeadError, SealedBlob};
pub use keyring::{generate_mnemonic, KeyringError, ServiceKeyring};

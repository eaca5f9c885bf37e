//! Fragment Encryptor.
//!
//! Wraps each raw share with AES-256-GCM under a key unique to its
//! (record, node) pair before the share leaves the splitting boundary.
//!
//! ## Design
//!
//! - **Key**: 32 random bytes per (record, node), never derived, never stored
//!   beside the fragment (it travels sealed inside the manifest)
//! - **AAD**: `record_id || share_index || node_id || rotation_epoch`, so
//!   a fragment moved to another slot or replayed from an older epoch fails
//! - **MAC**: the detached GCM tag, persisted as `Fragment::mac`
//!
//! ## Security Properties
//!
//! - A stored fragment is useless without both enough fragments and the
//!   node-specific key
//! - Any tampering fails closed with `AuthenticationFailed`

use crate::crypto::aead::{self, AeadError, SealedBlob, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use crate::sharing::Share;
use crate::types::{now_secs, NodeId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors that can occur during fragment operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Fragment authentication failed")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid node key: must be 32 bytes")]
    InvalidKey,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

impl From<AeadError> for FragmentError {
    fn from(err: AeadError) -> Self {
        match err {
            AeadError::AuthenticationFailed => FragmentError::AuthenticationFailed,
            other => FragmentError::EncryptionFailed(other.to_string()),
        }
    }
}

/// Symmetric key for one (record, node) pair.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NodeKey([u8; KEY_LEN]);

impl NodeKey {
    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, FragmentError> {
        Ok(Self(aead::random_bytes::<KEY_LEN>()?))
    }

    /// Rebuild a key from unsealed bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FragmentError> {
        if bytes.len() != KEY_LEN {
            return Err(FragmentError::InvalidKey);
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeKey(..)")
    }
}

/// Location of a fragment: the fragment store is keyed by
/// `(record_id, node_id)`, and each node keeps one fragment per rotation epoch
/// so a rotation can be written before the previous epoch is erased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentRef {
    pub record_id: RecordId,
    pub node_id: NodeId,
    pub rotation_epoch: u64,
}

/// An encrypted, authenticated share as persisted on a mirror node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Record this fragment belongs to
    pub record_id: RecordId,

    /// Evaluation point of the wrapped share
    pub share_index: u8,

    /// Node the fragment was encrypted for
    pub node_id: NodeId,

    /// AES-256-GCM ciphertext of the CBOR-encoded share
    pub ciphertext: Vec<u8>,

    /// GCM nonce (12 bytes, unique per encryption)
    pub nonce: [u8; NONCE_LEN],

    /// GCM tag over ciphertext and metadata
    pub mac: [u8; TAG_LEN],

    /// Creation time
    pub created_at: Timestamp,

    /// Key rotation generation of the record
    pub rotation_epoch: u64,
}

impl Fragment {
    /// Where this fragment is stored.
    pub fn reference(&self) -> FragmentRef {
        FragmentRef {
            record_id: self.record_id.clone(),
            node_id: self.node_id.clone(),
            rotation_epoch: self.rotation_epoch,
        }
    }

    /// Stored size in bytes (ciphertext plus fixed-size fields).
    pub fn stored_size(&self) -> usize {
        self.ciphertext.len() + NONCE_LEN + TAG_LEN
    }

    fn sealed_blob(&self) -> SealedBlob {
        SealedBlob {
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            tag: self.mac,
        }
    }
}

/// Associated data binding a fragment to its slot.
///
/// Length-prefixed so distinct field splits never collide.
pub fn associated_data(
    record_id: &RecordId,
    share_index: u8,
    node_id: &NodeId,
    rotation_epoch: u64,
) -> Vec<u8> {
    let record = record_id.as_str().as_bytes();
    let node = node_id.as_str().as_bytes();

    let mut aad = Vec::with_capacity(record.len() + node.len() + 25);
    aad.extend_from_slice(&(record.len() as u64).to_le_bytes());
    aad.extend_from_slice(record);
    aad.push(share_index);
    aad.extend_from_slice(&(node.len() as u64).to_le_bytes());
    aad.extend_from_slice(node);
    aad.extend_from_slice(&rotation_epoch.to_le_bytes());
    aad
}

/// Encrypt a share for a specific node.
pub fn encrypt(
    share: &Share,
    record_id: &RecordId,
    node_id: &NodeId,
    rotation_epoch: u64,
    key: &NodeKey,
) -> Result<Fragment, FragmentError> {
    let mut plaintext = to_cbor(share)?;
    let aad = associated_data(record_id, share.index, node_id, rotation_epoch);
    let sealed = aead::seal(key.as_bytes(), &aad, &plaintext);
    plaintext.zeroize();
    let sealed = sealed?;

    Ok(Fragment {
        record_id: record_id.clone(),
        share_index: share.index,
        node_id: node_id.clone(),
        ciphertext: sealed.ciphertext,
        nonce: sealed.nonce,
        mac: sealed.tag,
        created_at: now_secs(),
        rotation_epoch,
    })
}

/// Decrypt a fragment back into its share.
///
/// # Errors
///
/// - `AuthenticationFailed`: wrong key, tampered ciphertext/MAC/nonce, or
///   metadata that does not match what was encrypted
pub fn decrypt(fragment: &Fragment, key: &NodeKey) -> Result<Share, FragmentError> {
    let aad = associated_data(
        &fragment.record_id,
        fragment.share_index,
        &fragment.node_id,
        fragment.rotation_epoch,
    );
    let mut plaintext = aead::open(key.as_bytes(), &aad, &fragment.sealed_blob())?;
    let share: Result<Share, _> = from_cbor(&plaintext);
    plaintext.zeroize();

    let share = share.map_err(|_| FragmentError::AuthenticationFailed)?;
    if share.index != fragment.share_index {
        return Err(FragmentError::AuthenticationFailed);
    }
    Ok(share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::split;

    fn setup() -> (Share, RecordId, NodeId, NodeKey) {
        let share = split(b"fragment payload", 3, 2).unwrap().remove(1);
        (
            share,
            RecordId::new("record-1"),
            NodeId::new("node-a"),
            NodeKey::generate().unwrap(),
        )
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (share, record, node, key) = setup();
        let fragment = encrypt(&share, &record, &node, 0, &key).unwrap();

        assert_eq!(fragment.share_index, share.index);
        assert_eq!(fragment.reference().node_id, node);
        assert_eq!(decrypt(&fragment, &key).unwrap(), share);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let (share, record, node, key) = setup();
        let fragment = encrypt(&share, &record, &node, 0, &key).unwrap();
        let other = NodeKey::generate().unwrap();
        assert_eq!(
            decrypt(&fragment, &other),
            Err(FragmentError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let (share, record, node, key) = setup();
        let mut fragment = encrypt(&share, &record, &node, 0, &key).unwrap();
        fragment.ciphertext[0] ^= 0x01;
        assert_eq!(
            decrypt(&fragment, &key),
            Err(FragmentError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_metadata_is_authenticated() {
        let (share, record, node, key) = setup();
        let fragment = encrypt(&share, &record, &node, 3, &key).unwrap();

        let mut moved = fragment.clone();
        moved.node_id = NodeId::new("node-b");
        assert!(decrypt(&moved, &key).is_err());

        let mut replayed = fragment.clone();
        replayed.rotation_epoch = 2;
        assert!(decrypt(&replayed, &key).is_err());

        let mut reindexed = fragment;
        reindexed.share_index = reindexed.share_index.wrapping_add(1);
        assert!(decrypt(&reindexed, &key).is_err());
    }

    #[test]
    fn test_node_key_length_checked() {
        assert_eq!(
            NodeKey::from_slice(&[0u8; 16]).unwrap_err(),
            FragmentError::InvalidKey
        );
        assert!(NodeKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_associated_data_distinguishes_field_splits() {
        let a = associated_data(&RecordId::new("ab"), 1, &NodeId::new("c"), 0);
        let b = associated_data(&RecordId::new("a"), 1, &NodeId::new("bc"), 0);
        assert_ne!(a, b);
    }
}

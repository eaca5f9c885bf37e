//! Fragment manifests
//!
//! A manifest is the only persisted structure that names where a record's
//! fragments live. It carries the per-node fragment keys sealed under the
//! service keyring, the record's public commitments and the access policy,
//! and never any share value.
//!
//! ## Storage
//!
//! - `ManifestStore`: one backend keyed by `record_id`, holding CBOR bytes
//! - `ReplicatedManifestStore`: majority writes and majority reads over
//!   at least three independent backends
//! - `ManifestCache`: `Arc` swap-pointer view for lock-free readers
//! - `RecordLocks`: single writer per record

pub mod cache;
pub mod replicated;
pub mod store;

pub use cache::{ManifestCache, RecordLocks};
pub use replicated::ReplicatedManifestStore;
pub use store::{ManifestStore, MemoryManifestStore};

use crate::crypto::SealedBlob;
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use crate::types::{now_secs, NodeId, RecordId, Timestamp};
use crate::zk::RecordCommitment;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors from manifest storage
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    NotFound(RecordId),

    #[error("Manifest store unavailable: {0}")]
    Unavailable(String),

    #[error("No majority among manifest replicas for {record_id} ({agreeing}/{required})")]
    NoMajority {
        record_id: RecordId,
        agreeing: usize,
        required: usize,
    },

    #[error("Write reached {acks} of {required} required replicas")]
    QuorumNotReached { acks: usize, required: usize },

    #[error("Replicated store needs at least 3 replicas, got {0}")]
    TooFewReplicas(usize),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

/// Principals allowed to act on a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub readers: BTreeSet<String>,
    pub deleters: BTreeSet<String>,
}

impl AccessPolicy {
    /// Policy granting read and delete to a single principal.
    pub fn owner(principal: impl Into<String>) -> Self {
        let principal = principal.into();
        Self {
            readers: BTreeSet::from([principal.clone()]),
            deleters: BTreeSet::from([principal]),
        }
    }

    pub fn with_reader(mut self, principal: impl Into<String>) -> Self {
        self.readers.insert(principal.into());
        self
    }

    pub fn can_read(&self, principal: &str) -> bool {
        self.readers.contains(principal)
    }

    pub fn can_delete(&self, principal: &str) -> bool {
        self.deleters.contains(principal)
    }
}

/// One fragment holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEntry {
    pub share_index: u8,

    /// Per-node fragment key sealed under the manifest-sealing key
    pub sealed_key: SealedBlob,

    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestState {
    Active,
    /// Some holders could not confirm erasure; they are listed in `holders`
    PendingDeletion,
}

/// Per-record placement and key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub record_id: RecordId,

    /// Monotonic write version, compared by majority reads
    pub version: u64,

    pub n: u8,
    pub k: u8,
    pub rotation_epoch: u64,
    pub policy: AccessPolicy,
    pub holders: BTreeMap<NodeId, HolderEntry>,
    pub commitment: RecordCommitment,

    /// CBOR `OpeningSet` sealed under the opening-sealing key
    pub sealed_openings: Option<SealedBlob>,

    pub state: ManifestState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Manifest {
    pub fn holder_ids(&self) -> Vec<NodeId> {
        self.holders.keys().cloned().collect()
    }

    pub fn is_active(&self) -> bool {
        self.state == ManifestState::Active
    }

    /// Next version of this manifest, stamped now.
    pub fn next_version(&self) -> Manifest {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now_secs();
        next
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(to_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        Ok(from_cbor(bytes)?)
    }

    pub fn reference(&self) -> ManifestRef {
        ManifestRef {
            record_id: self.record_id.clone(),
            version: self.version,
            rotation_epoch: self.rotation_epoch,
        }
    }
}

/// Handle returned by `protect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub record_id: RecordId,
    pub version: u64,
    pub rotation_epoch: u64,
}

/// Context binding a sealed node key to its manifest slot.
pub fn key_context(record_id: &RecordId, node_id: &NodeId, rotation_epoch: u64) -> Vec<u8> {
    format!("key/{}/{}/{}", record_id, node_id, rotation_epoch).into_bytes()
}

/// Context binding sealed openings to their record.
pub fn opening_context(record_id: &RecordId) -> Vec<u8> {
    format!("opening/{}", record_id).into_bytes()
}


#[cfg(test)]
mod tests {
    use super::test_support::sample_manifest;
    use super::*;

    #[test]
    fn test_manifest_cbor_roundtrip() {
        let manifest = sample_manifest("r1", 4);
        let bytes = manifest.to_bytes().unwrap();
        assert_eq!(Manifest::from_bytes(&bytes).unwrap(), manifest);
    }

    #[test]
    fn test_next_version_increments() {
        let manifest = sample_manifest("r1", 4);
        let next = manifest.next_version();
        assert_eq!(next.version, 5);
        assert_eq!(next.holders, manifest.holders);
    }

    #[test]
    fn test_access_policy() {
        let policy = AccessPolicy::owner("alice").with_reader("bob");
        assert!(policy.can_read("bob"));
        assert!(!policy.can_delete("bob"));
        assert!(policy.can_delete("alice"));
        assert!(!policy.can_read("mallory"));
    }

    #[test]
    fn test_key_context_distinguishes_slots() {
        let r = RecordId::new("r1");
        assert_ne!(
            key_context(&r, &NodeId::new("a"), 0),
            key_context(&r, &NodeId::new("a"), 1)
        );
        assert_ne!(
            key_context(&r, &NodeId::new("a"), 0),
            key_context(&r, &NodeId::new("b"), 0)
        );
    }
}

//! Zero-Knowledge Verifier
//!
//! Commitments are created once at protect time and stored with the manifest.
//! Proofs are generated from the sealed openings alone: no fragment is ever
//! fetched and no share is ever rebuilt to answer a proof request.
//!
//! ## Commitments
//!
//! - **Record**: `v = SHA-256(record_id || payload)` reduced into the scalar
//!   field, committed as `v·G + r·H`
//! - **Attributes**: caller-supplied named `u64` values, each committed under
//!   its own blinder

pub mod pedersen;
pub mod proofs;

pub use pedersen::Commitment;
pub use proofs::{prove_attribute, prove_existence, verify, verify_attribute};
pub use proofs::{BitProof, ExistenceProof, Predicate, RangeProof};

use crate::serialization::{from_cbor, to_cbor, SerializationError};
use crate::types::RecordId;
use k256::Scalar;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use zeroize::Zeroize;

const RECORD_VALUE_DOMAIN: &[u8] = b"mirrorshard-record-value-v1";

/// Errors from commitment and proof handling
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZkError {
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Committed value does not satisfy the predicate")]
    PredicateUnsatisfied,

    #[error("Random number generation failed")]
    RandomFailed,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

/// Public commitments stored beside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCommitment {
    pub record: Commitment,

    #[serde(default)]
    pub attributes: BTreeMap<String, Commitment>,
}

impl RecordCommitment {
    pub fn attribute(&self, name: &str) -> Option<&Commitment> {
        self.attributes.get(name)
    }
}

#[derive(Serialize, Deserialize)]
struct AttributeOpening {
    value: u64,
    blinder: [u8; 32],
}

/// Secret openings of a `RecordCommitment`.
///
/// Only ever persisted sealed under the keyring's opening key.
#[derive(Serialize, Deserialize)]
pub struct OpeningSet {
    value: [u8; 32],
    blinder: [u8; 32],
    attributes: BTreeMap<String, AttributeOpening>,
}

impl Drop for OpeningSet {
    fn drop(&mut self) {
        self.value.zeroize();
        self.blinder.zeroize();
        for opening in self.attributes.values_mut() {
            opening.value.zeroize();
            opening.blinder.zeroize();
        }
    }
}

fn to_array(scalar: &Scalar) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&pedersen::encode_scalar(scalar));
    out
}

impl OpeningSet {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ZkError> {
        Ok(to_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ZkError> {
        Ok(from_cbor(bytes)?)
    }

    /// Existence proof for the record commitment.
    pub fn prove_existence(
        &self,
        record_id: &RecordId,
        commitment: &RecordCommitment,
    ) -> Result<ExistenceProof, ZkError> {
        let value = pedersen::decode_scalar(&self.value)?;
        let blinder = pedersen::decode_scalar(&self.blinder)?;
        proofs::prove_existence(record_id, &commitment.record, &value, &blinder)
    }

    /// Range proof for a named attribute.
    pub fn prove_attribute(
        &self,
        record_id: &RecordId,
        attribute: &str,
        predicate: Predicate,
    ) -> Result<RangeProof, ZkError> {
        let opening = self
            .attributes
            .get(attribute)
            .ok_or_else(|| ZkError::UnknownAttribute(attribute.to_string()))?;
        let blinder = pedersen::decode_scalar(&opening.blinder)?;
        proofs::prove_attribute(record_id, attribute, predicate, opening.value, &blinder)
    }
}

/// Scalar committed to for a record.
pub fn record_value(record_id: &RecordId, payload: &[u8]) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(RECORD_VALUE_DOMAIN);
    hasher.update((record_id.as_str().len() as u64).to_le_bytes());
    hasher.update(record_id.as_str().as_bytes());
    hasher.update(payload);
    pedersen::hash_to_scalar(hasher)
}

/// Commit to a record and its attributes.
pub fn commit_record(
    record_id: &RecordId,
    payload: &[u8],
    attributes: &BTreeMap<String, u64>,
) -> (RecordCommitment, OpeningSet) {
    let value = record_value(record_id, payload);
    let blinder = pedersen::random_scalar();

    let mut commitments = BTreeMap::new();
    let mut openings = BTreeMap::new();
    for (name, &attr) in attributes {
        let r = pedersen::random_scalar();
        commitments.insert(name.clone(), pedersen::commitment(&Scalar::from(attr), &r));
        openings.insert(
            name.clone(),
            AttributeOpening {
                value: attr,
                blinder: to_array(&r),
            },
        );
    }

    let commitment = RecordCommitment {
        record: pedersen::commitment(&value, &blinder),
        attributes: commitments,
    };
    let opening = OpeningSet {
        value: to_array(&value),
        blinder: to_array(&blinder),
        attributes: openings,
    };
    (commitment, opening)
}

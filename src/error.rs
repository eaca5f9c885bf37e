//! Errors returned by the `MirrorGuard` facade.
//!
//! Component errors are folded into `ProtectionError`. Each variant belongs to
//! one `ErrorClass`, which fixes how it propagates:
//!
//! - **Caller**: bad input, surfaced immediately, nothing mutated
//! - **Operational**: retried or rebalanced internally, surfaced with an alert
//!   once that fails
//! - **Integrity**: the offending fragment is discarded and treated as missing
//! - **HardFailure**: never masked with a partial or guessed result
//! - **Policy**: surfaced unchanged and reported to the breach detector

use crate::crypto::KeyringError;
use crate::distribution::DistributionError;
use crate::fragment::FragmentError;
use crate::manifest::ManifestError;
use crate::reconstruction::ReconstructionError;
use crate::sharing::SharingError;
use crate::types::{NodeId, RecordId};
use crate::zk::ZkError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Caller,
    Operational,
    Integrity,
    HardFailure,
    Policy,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtectionError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Insufficient capacity: need {needed} nodes, {available} usable")]
    InsufficientCapacity { needed: usize, available: usize },

    #[error("Redundancy lost for {record_id}: {valid} valid fragments, {needed} needed")]
    RedundancyLost {
        record_id: RecordId,
        valid: usize,
        needed: usize,
    },

    #[error("Fragment authentication failed")]
    AuthenticationFailed,

    #[error("Inconsistent shares: {0}")]
    InconsistentShares(String),

    #[error("Reconstruction impossible for {record_id}: {reason}")]
    ReconstructionImpossible { record_id: RecordId, reason: String },

    #[error("{principal} is not authorized for {record_id}")]
    Unauthorized {
        principal: String,
        record_id: RecordId,
    },

    #[error("Partial deletion of {record_id}: {} holders unreached", unreached.len())]
    PartialDeletion {
        record_id: RecordId,
        unreached: Vec<NodeId>,
    },

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Fragment distribution failed on {failed:?}")]
    DistributionFailed { failed: Vec<NodeId> },

    #[error("Manifest error: {0}")]
    Manifest(ManifestError),

    #[error("Keyring error: {0}")]
    Keyring(#[from] KeyringError),

    #[error("Proof error: {0}")]
    Proof(#[from] ZkError),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl ProtectionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtectionError::InvalidParameters(_) | ProtectionError::NotFound(_) => {
                ErrorClass::Caller
            }
            ProtectionError::InsufficientCapacity { .. }
            | ProtectionError::RedundancyLost { .. }
            | ProtectionError::PartialDeletion { .. }
            | ProtectionError::DistributionFailed { .. }
            | ProtectionError::Manifest(_) => ErrorClass::Operational,
            ProtectionError::AuthenticationFailed | ProtectionError::InconsistentShares(_) => {
                ErrorClass::Integrity
            }
            ProtectionError::ReconstructionImpossible { .. }
            | ProtectionError::Keyring(_)
            | ProtectionError::Crypto(_) => ErrorClass::HardFailure,
            ProtectionError::Unauthorized { .. } => ErrorClass::Policy,
            ProtectionError::Proof(ZkError::UnknownAttribute(_))
            | ProtectionError::Proof(ZkError::PredicateUnsatisfied) => ErrorClass::Caller,
            ProtectionError::Proof(_) => ErrorClass::HardFailure,
        }
    }
}

impl From<SharingError> for ProtectionError {
    fn from(err: SharingError) -> Self {
        match err {
            SharingError::InvalidParameters(msg) => ProtectionError::InvalidParameters(msg),
            SharingError::InconsistentShares(msg) => ProtectionError::InconsistentShares(msg),
            e @ SharingError::InsufficientShares { .. } => {
                ProtectionError::InvalidParameters(e.to_string())
            }
        }
    }
}

impl From<FragmentError> for ProtectionError {
    fn from(err: FragmentError) -> Self {
        match err {
            FragmentError::AuthenticationFailed => ProtectionError::AuthenticationFailed,
            other => ProtectionError::Crypto(other.to_string()),
        }
    }
}

impl From<ManifestError> for ProtectionError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(record_id) => ProtectionError::NotFound(record_id),
            other => ProtectionError::Manifest(other),
        }
    }
}

impl From<DistributionError> for ProtectionError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::InsufficientCapacity { needed, available } => {
                ProtectionError::InsufficientCapacity { needed, available }
            }
            DistributionError::StoreFailed { failed, .. } => {
                ProtectionError::DistributionFailed { failed }
            }
        }
    }
}

impl From<ReconstructionError> for ProtectionError {
    fn from(err: ReconstructionError) -> Self {
        let record_id = match &err {
            ReconstructionError::Impossible { record_id, .. }
            | ReconstructionError::Inconsistent { record_id, .. }
            | ReconstructionError::DeadlineExceeded { record_id, .. } => record_id.clone(),
        };
        ProtectionError::ReconstructionImpossible {
            record_id,
            reason: err.to_string(),
        }
    }
}

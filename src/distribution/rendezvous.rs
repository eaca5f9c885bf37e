//! Rendezvous hashing for fragment placement.
//!
//! Highest-random-weight ordering of candidate nodes per record:
//!
//! ```text
//! score(node) = SHA256(record_id || node_id || epoch)
//! ```
//!
//! - **Deterministic**: same (record, nodes, epoch) gives the same order
//! - **Uniform**: records spread evenly over nodes
//! - **Stable**: adding or removing a node only moves the records it wins or loses
//! - **Unbiased**: the caller choosing the record id cannot steer placement
//!   without grinding ids
//!
//! The rotation epoch is part of the score, so a rotated record lands on a
//! fresh ordering.

use crate::types::{NodeId, RecordId};
use sha2::{Digest, Sha256};

/// Rendezvous score of `node_id` for `record_id` at `epoch`.
pub fn rendezvous_score(record_id: &RecordId, node_id: &NodeId, epoch: u64) -> [u8; 32] {
    let record = record_id.as_str().as_bytes();
    let node = node_id.as_str().as_bytes();

    let mut hasher = Sha256::new();
    hasher.update((record.len() as u64).to_le_bytes());
    hasher.update(record);
    hasher.update((node.len() as u64).to_le_bytes());
    hasher.update(node);
    hasher.update(epoch.to_le_bytes());
    hasher.finalize().into()
}

/// Candidates sorted by descending rendezvous score.
pub fn rank<'a>(record_id: &RecordId, candidates: &'a [NodeId], epoch: u64) -> Vec<&'a NodeId> {
    let mut scored: Vec<([u8; 32], &NodeId)> = candidates
        .iter()
        .map(|node| (rendezvous_score(record_id, node, epoch), node))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().map(|(_, node)| node).collect()
}

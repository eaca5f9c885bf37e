//! Reconstruction Service
//!
//! Gathers fragments from the best available holders and rebuilds a record.
//!
//! ## Flow
//!
//! 1. Candidates arrive ranked best-first, each with its unsealed node key
//! 2. First wave: fetch from the top `k + padding` holders concurrently
//! 3. Decrypt each fragment; any that fails authentication or carries the
//!    wrong slot metadata is discarded and treated as missing
//! 4. If fewer than `k` valid shares came back, a second wave covers every
//!    remaining candidate
//! 5. Reconstruct from all valid shares; on inconsistency search the
//!    `k`-subsets for one whose payload passes its checksum
//!
//! Fewer than `k` valid shares is a hard failure. No partial or guessed value
//! is ever returned.

use crate::fragment::{decrypt, FragmentError, FragmentRef, NodeKey};
use crate::node::{with_deadline, MirrorNode};
use crate::sharing::{reconstruct, Share, SharingError};
use crate::types::{NodeId, RecordId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from reconstruction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("Reconstruction impossible for {record_id}: {valid} valid fragments, {needed} needed")]
    Impossible {
        record_id: RecordId,
        valid: usize,
        needed: usize,
    },

    #[error("Retrieval of {record_id} exceeded its {deadline_ms}ms deadline")]
    DeadlineExceeded { record_id: RecordId, deadline_ms: u64 },

    #[error("Valid fragments for {record_id} do not agree: {reason}")]
    Inconsistent { record_id: RecordId, reason: String },
}

/// A holder to fetch from, with the key for its fragment.
pub struct Candidate {
    pub node: Arc<dyn MirrorNode>,
    pub share_index: u8,
    pub key: NodeKey,
}

/// Counters for one retrieval, kept even when it fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStats {
    /// Nodes a fetch was issued to, in order
    pub contacted: Vec<NodeId>,

    /// Fragments returned by nodes
    pub fetched: usize,

    /// Fragments that decrypted to a share
    pub valid: usize,

    /// Fragments dropped for failed authentication or wrong metadata
    pub discarded: usize,

    pub waves: usize,
    pub elapsed_ms: u64,
}

/// Fetch fan-out and reconstruction settings.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    padding: usize,
    node_timeout: Duration,
    deadline: Duration,
}

enum FetchOutcome {
    Valid(Share),
    Discarded,
    Missing,
}

impl Reconstructor {
    pub fn new(padding: usize, node_timeout: Duration, deadline: Duration) -> Self {
        Self {
            padding,
            node_timeout,
            deadline,
        }
    }

    /// Rebuild `record_id` from `candidates`, best first.
    ///
    /// `stats` is filled in as the retrieval proceeds, so callers still see
    /// which nodes were contacted when the deadline expires.
    pub async fn retrieve(
        &self,
        record_id: &RecordId,
        rotation_epoch: u64,
        k: usize,
        candidates: Vec<Candidate>,
        stats: &mut RetrievalStats,
    ) -> Result<Vec<u8>, ReconstructionError> {
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.deadline,
            self.gather(record_id, rotation_epoch, k, candidates, stats),
        )
        .await;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match result {
            Ok(result) => result,
            Err(_) => Err(ReconstructionError::DeadlineExceeded {
                record_id: record_id.clone(),
                deadline_ms: self.deadline.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => info!(
                record_id = %record_id,
                fetched = stats.fetched,
                valid = stats.valid,
                discarded = stats.discarded,
                waves = stats.waves,
                elapsed_ms = stats.elapsed_ms,
                "Record reconstructed"
            ),
            Err(e) => warn!(
                record_id = %record_id,
                fetched = stats.fetched,
                valid = stats.valid,
                discarded = stats.discarded,
                "Reconstruction failed: {}",
                e
            ),
        }
        result
    }

    async fn gather(
        &self,
        record_id: &RecordId,
        rotation_epoch: u64,
        k: usize,
        mut candidates: Vec<Candidate>,
        stats: &mut RetrievalStats,
    ) -> Result<Vec<u8>, ReconstructionError> {
        let first_wave = (k + self.padding).min(candidates.len());
        let second: Vec<Candidate> = candidates.split_off(first_wave);
        let waves = [candidates, second];

        let mut shares: Vec<Share> = Vec::new();
        let mut last_inconsistency = None;

        for wave in waves {
            if wave.is_empty() {
                continue;
            }
            stats.waves += 1;
            stats
                .contacted
                .extend(wave.iter().map(|c| c.node.id().clone()));

            let outcomes = join_all(
                wave.iter()
                    .map(|candidate| self.fetch_one(record_id, rotation_epoch, candidate)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    FetchOutcome::Valid(share) => {
                        stats.fetched += 1;
                        stats.valid += 1;
                        shares.push(share);
                    }
                    FetchOutcome::Discarded => {
                        stats.fetched += 1;
                        stats.discarded += 1;
                    }
                    FetchOutcome::Missing => {}
                }
            }

            if shares.len() >= k {
                match resolve(&shares, k) {
                    Ok(payload) => return Ok(payload),
                    Err(reason) => {
                        warn!(record_id = %record_id, valid = shares.len(), "Inconsistent shares, widening fetch");
                        last_inconsistency = Some(reason);
                    }
                }
            } else {
                debug!(record_id = %record_id, valid = shares.len(), k, "Wave short of threshold");
            }
        }

        match last_inconsistency {
            Some(reason) => Err(ReconstructionError::Inconsistent {
                record_id: record_id.clone(),
                reason,
            }),
            None => Err(ReconstructionError::Impossible {
                record_id: record_id.clone(),
                valid: shares.len(),
                needed: k,
            }),
        }
    }

    async fn fetch_one(
        &self,
        record_id: &RecordId,
        rotation_epoch: u64,
        candidate: &Candidate,
    ) -> FetchOutcome {
        let node_id = candidate.node.id();
        let fragment_ref = FragmentRef {
            record_id: record_id.clone(),
            node_id: node_id.clone(),
            rotation_epoch,
        };

        let fragment = match with_deadline(self.node_timeout, candidate.node.fetch(&fragment_ref)).await
        {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!(node_id = %node_id, "Fragment fetch failed: {}", e);
                return FetchOutcome::Missing;
            }
        };

        if fragment.record_id != *record_id
            || fragment.node_id != *node_id
            || fragment.share_index != candidate.share_index
            || fragment.rotation_epoch != rotation_epoch
        {
            warn!(node_id = %node_id, record_id = %record_id, "Fragment metadata mismatch, discarded");
            return FetchOutcome::Discarded;
        }

        match decrypt(&fragment, &candidate.key) {
            Ok(share) => FetchOutcome::Valid(share),
            Err(FragmentError::AuthenticationFailed) => {
                warn!(node_id = %node_id, record_id = %record_id, "Fragment failed authentication, discarded");
                FetchOutcome::Discarded
            }
            Err(e) => {
                warn!(node_id = %node_id, "Fragment decrypt failed: {}", e);
                FetchOutcome::Discarded
            }
        }
    }
}

/// Upper bound on `k`-subsets tried before giving up on a share set.
const MAX_SUBSETS: usize = 4096;

/// Reconstruct from every share, falling back to a search over `k`-subsets.
///
/// Any `k` shares interpolate to some value, so a subset only counts once its
/// decoded payload passes the length and checksum framing.
fn resolve(shares: &[Share], k: usize) -> Result<Vec<u8>, String> {
    let reason = match reconstruct(shares, k) {
        Ok(payload) => return Ok(payload),
        Err(SharingError::InconsistentShares(reason)) if shares.len() > k => reason,
        Err(e) => return Err(e.to_string()),
    };

    let mut picks: Vec<usize> = (0..k).collect();
    let mut tried = 0;
    loop {
        let subset: Vec<Share> = picks.iter().map(|&i| shares[i].clone()).collect();
        if let Ok(payload) = reconstruct(&subset, k) {
            debug!(
                used = ?subset.iter().map(|s| s.index).collect::<Vec<_>>(),
                tried,
                "Recovered from a consistent subset"
            );
            return Ok(payload);
        }
        tried += 1;
        if tried >= MAX_SUBSETS || !next_subset(&mut picks, shares.len()) {
            return Err(format!("{} (no consistent subset in {} tried)", reason, tried));
        }
    }
}

/// Advance `picks` to the next ascending combination drawn from `0..m`.
fn next_subset(picks: &mut [usize], m: usize) -> bool {
    let k = picks.len();
    for slot in (0..k).rev() {
        if picks[slot] < m - k + slot {
            picks[slot] += 1;
            for later in slot + 1..k {
                picks[later] = picks[later - 1] + 1;
            }
            return true;
        }
    }
    false
}

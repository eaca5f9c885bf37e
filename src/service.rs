//! MirrorGuard: the public facade.
//!
//! Wires the components together and owns the write discipline:
//!
//! - Every manifest write (protect, rebalance, rotate, delete) runs under the
//!   record's lock, so two re-splits of one record never race
//! - Readers take no lock; they see the cached `Arc<Manifest>` as it was
//!   before or after a swap, never a mix
//! - Fragments are always written before the manifest that points at them,
//!   and old fragments are erased only after the new manifest is committed
//!
//! ## Breach handling
//!
//! Every retrieval is reported to the breach detector. A pair that reaches
//! `Locked` gets its node quarantined and each affected record rotated onto a
//! fresh selection with fresh node keys.

use crate::breach::{Alert, AlertEvent, BreachDetector, BreachPolicy, BreachResponse};
use crate::crypto::{SealedBlob, ServiceKeyring};
use crate::distribution::{select_nodes, without, DistributionError, Distributor, Placement};
use crate::error::ProtectionError;
use crate::fragment::{encrypt, FragmentRef, NodeKey};
use crate::manifest::{
    key_context, opening_context, AccessPolicy, HolderEntry, Manifest, ManifestCache,
    ManifestRef, ManifestState, RecordLocks, ReplicatedManifestStore,
};
use crate::node::{
    HealthMonitor, HealthPolicy, MirrorNode, NodeStatusReport, ScalingAdvice,
};
use crate::reconstruction::{Candidate, ReconstructionError, Reconstructor, RetrievalStats};
use crate::sharing::{split, validate_parameters};
use crate::types::{now_secs, NodeId, RecordId};
use crate::zk::{self, commit_record, ExistenceProof, OpeningSet, Predicate, RangeProof, RecordCommitment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Runtime settings for a `MirrorGuard`, usually built from `MirrorConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardSettings {
    pub default_n: usize,
    pub default_k: usize,
    pub padding: usize,
    pub node_timeout: Duration,
    pub retrieve_deadline: Duration,

    /// Unreachable time after which a holder's records are rebalanced
    pub rebalance_grace: Duration,

    pub health: HealthPolicy,
    pub breach: BreachPolicy,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            default_n: 5,
            default_k: 3,
            padding: 2,
            node_timeout: Duration::from_secs(2),
            retrieve_deadline: Duration::from_secs(10),
            rebalance_grace: Duration::from_secs(300),
            health: HealthPolicy::default(),
            breach: BreachPolicy::default(),
        }
    }
}

/// Per-call options for `protect`.
#[derive(Debug, Clone, Default)]
pub struct ProtectOptions {
    /// Fragments to create; the configured default when `None`
    pub n: Option<usize>,

    /// Fragments needed to rebuild; the configured default when `None`
    pub k: Option<usize>,

    pub policy: AccessPolicy,

    /// Named values committed for later range proofs
    pub attributes: BTreeMap<String, u64>,
}

impl ProtectOptions {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn threshold(mut self, n: usize, k: usize) -> Self {
        self.n = Some(n);
        self.k = Some(k);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: u64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterAuth {
    pub principal: String,
}

impl RequesterAuth {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }
}

/// Outcome of a completed deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReceipt {
    pub record_id: RecordId,
    pub confirmed: bool,
    pub erased: Vec<NodeId>,

    /// Holders that never confirmed erasure. Their fragments are useless:
    /// fewer than k remain and the node keys have been destroyed.
    pub unreached: Vec<NodeId>,
}

/// Result of one `sweep_rebalance` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub checked: usize,
    pub rebalanced: Vec<RecordId>,
    pub failed: Vec<(RecordId, String)>,
}

pub struct MirrorGuard {
    settings: GuardSettings,
    keyring: ServiceKeyring,
    manifests: ReplicatedManifestStore,
    cache: ManifestCache,
    locks: RecordLocks,
    health: Arc<HealthMonitor>,
    distributor: Distributor,
    reconstructor: Reconstructor,
    breach: BreachDetector,
}

impl MirrorGuard {
    pub fn new(
        settings: GuardSettings,
        keyring: ServiceKeyring,
        manifests: ReplicatedManifestStore,
    ) -> Self {
        Self {
            health: Arc::new(HealthMonitor::new(settings.health.clone())),
            distributor: Distributor::new(settings.node_timeout),
            reconstructor: Reconstructor::new(
                settings.padding,
                settings.node_timeout,
                settings.retrieve_deadline,
            ),
            breach: BreachDetector::new(settings.breach.clone()),
            cache: ManifestCache::new(),
            locks: RecordLocks::new(),
            settings,
            keyring,
            manifests,
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn breach(&self) -> &BreachDetector {
        &self.breach
    }

    pub async fn register_node(&self, node: Arc<dyn MirrorNode>) {
        self.health.register(node).await;
    }

    // ------------------------------------------------------------------
    // protect
    // ------------------------------------------------------------------

    /// Split, encrypt and distribute `payload`, then commit its manifest.
    ///
    /// Re-protecting an existing record replaces it: a full re-split under the
    /// next rotation epoch, after which the previous fragments are erased.
    ///
    /// # Errors
    ///
    /// - `InvalidParameters`: k > n, k < 1, n > 255, or the payload is too large
    /// - `InsufficientCapacity`: fewer than n healthy nodes
    /// - `DistributionFailed`: a store failed; every written fragment was
    ///   deleted again and no manifest was committed
    pub async fn protect(
        &self,
        record_id: &RecordId,
        payload: &[u8],
        options: ProtectOptions,
    ) -> Result<ManifestRef, ProtectionError> {
        let n = options.n.unwrap_or(self.settings.default_n);
        let k = options.k.unwrap_or(self.settings.default_k);
        validate_parameters(n, k)?;

        let _guard = self.locks.lock(record_id).await;
        let previous = self.manifests.get(record_id).await?;
        let epoch = previous.as_ref().map_or(0, |m| m.rotation_epoch + 1);

        let pool = self.health.healthy_pool().await;
        let selected = select_nodes(record_id, epoch, &pool, n)?;
        let (placements, holders) = self.place(record_id, payload, epoch, k, &selected)?;
        self.distribute(record_id, &placements).await?;

        let (commitment, openings) = commit_record(record_id, payload, &options.attributes);
        let sealed_openings = match self.seal_openings(record_id, &openings) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.discard(&placements).await;
                return Err(e);
            }
        };

        let now = now_secs();
        let manifest = Manifest {
            record_id: record_id.clone(),
            version: previous.as_ref().map_or(1, |m| m.version + 1),
            n: n as u8,
            k: k as u8,
            rotation_epoch: epoch,
            policy: options.policy,
            holders,
            commitment,
            sealed_openings: Some(sealed_openings),
            state: ManifestState::Active,
            created_at: previous.as_ref().map_or(now, |m| m.created_at),
            updated_at: now,
        };
        self.commit(&manifest, &placements).await?;

        if let Some(previous) = previous {
            self.erase_epoch(&previous).await;
        }

        info!(record_id = %record_id, n, k, epoch, "Record protected");
        Ok(manifest.reference())
    }

    /// Split `payload` across `nodes` under fresh node keys.
    fn place(
        &self,
        record_id: &RecordId,
        payload: &[u8],
        epoch: u64,
        k: usize,
        nodes: &[Arc<dyn MirrorNode>],
    ) -> Result<(Vec<Placement>, BTreeMap<NodeId, HolderEntry>), ProtectionError> {
        let shares = split(payload, nodes.len(), k)?;
        let now = now_secs();

        let mut placements = Vec::with_capacity(nodes.len());
        let mut holders = BTreeMap::new();
        for (share, node) in shares.iter().zip(nodes) {
            let key = NodeKey::generate()?;
            let fragment = encrypt(share, record_id, node.id(), epoch, &key)?;
            let sealed_key = self.keyring.seal_node_key(
                &key_context(record_id, node.id(), epoch),
                key.as_bytes(),
            )?;
            holders.insert(
                node.id().clone(),
                HolderEntry {
                    share_index: share.index,
                    sealed_key,
                    created_at: now,
                },
            );
            placements.push(Placement {
                node: node.clone(),
                fragment,
            });
        }
        Ok((placements, holders))
    }

    async fn distribute(
        &self,
        record_id: &RecordId,
        placements: &[Placement],
    ) -> Result<(), ProtectionError> {
        match self.distributor.distribute(placements).await {
            Ok(()) => Ok(()),
            Err(DistributionError::StoreFailed { failed, orphaned }) => {
                self.breach.emit(AlertEvent::DistributionRolledBack {
                    record_id: record_id.clone(),
                    failed: failed.clone(),
                    orphaned,
                });
                Err(ProtectionError::DistributionFailed { failed })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn seal_openings(
        &self,
        record_id: &RecordId,
        openings: &OpeningSet,
    ) -> Result<SealedBlob, ProtectionError> {
        let bytes = Zeroizing::new(openings.to_bytes()?);
        Ok(self
            .keyring
            .seal_opening(&opening_context(record_id), &bytes)?)
    }

    /// Write the manifest to a majority of replicas and publish it.
    ///
    /// If the write fails, the fragments it would have pointed at are erased.
    async fn commit(
        &self,
        manifest: &Manifest,
        placements: &[Placement],
    ) -> Result<(), ProtectionError> {
        if let Err(e) = self.manifests.put(manifest).await {
            warn!(record_id = %manifest.record_id, "Manifest write failed, discarding fragments: {}", e);
            self.discard(placements).await;
            return Err(e.into());
        }
        self.cache.swap(manifest.clone()).await;
        Ok(())
    }

    async fn discard(&self, placements: &[Placement]) {
        let targets: Vec<(Arc<dyn MirrorNode>, FragmentRef)> = placements
            .iter()
            .map(|p| (p.node.clone(), p.fragment.reference()))
            .collect();
        self.distributor.erase(&targets).await;
    }

    /// Best-effort erase of every fragment a manifest points at.
    ///
    /// Returns the holders that confirmed and the ones that did not.
    async fn erase_epoch(&self, manifest: &Manifest) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut targets = Vec::new();
        let mut unreached = Vec::new();
        for node_id in manifest.holders.keys() {
            match self.health.node(node_id).await {
                Some(node) => targets.push((
                    node,
                    FragmentRef {
                        record_id: manifest.record_id.clone(),
                        node_id: node_id.clone(),
                        rotation_epoch: manifest.rotation_epoch,
                    },
                )),
                None => unreached.push(node_id.clone()),
            }
        }

        let mut erased = Vec::new();
        for (node_id, result) in self.distributor.erase(&targets).await {
            match result {
                Ok(()) => erased.push(node_id),
                Err(_) => unreached.push(node_id),
            }
        }
        debug!(
            record_id = %manifest.record_id,
            epoch = manifest.rotation_epoch,
            erased = erased.len(),
            unreached = unreached.len(),
            "Erased fragment epoch"
        );
        (erased, unreached)
    }

    // ------------------------------------------------------------------
    // retrieve
    // ------------------------------------------------------------------

    /// Latest manifest, from the cache when present.
    async fn load(&self, record_id: &RecordId) -> Result<Arc<Manifest>, ProtectionError> {
        if let Some(manifest) = self.cache.get(record_id).await {
            return Ok(manifest);
        }
        match self.manifests.get(record_id).await? {
            Some(manifest) => Ok(self.cache.swap(manifest).await),
            None => Err(ProtectionError::NotFound(record_id.clone())),
        }
    }

    /// Current manifest of `record_id`, for operator inspection.
    pub async fn manifest(&self, record_id: &RecordId) -> Result<Arc<Manifest>, ProtectionError> {
        self.load(record_id).await
    }

    async fn load_active(&self, record_id: &RecordId) -> Result<Arc<Manifest>, ProtectionError> {
        let manifest = self.load(record_id).await?;
        if !manifest.is_active() {
            return Err(ProtectionError::NotFound(record_id.clone()));
        }
        Ok(manifest)
    }

    /// Rebuild the plaintext of `record_id` for an authorized reader.
    ///
    /// Unknown records are refused like any other unauthorized read, so the
    /// answer does not reveal whether a record exists.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: the principal is not a reader, or the record does
    ///   not exist (reported to the breach detector)
    /// - `ReconstructionImpossible`: fewer than k valid fragments within the
    ///   deadline
    pub async fn retrieve(
        &self,
        record_id: &RecordId,
        auth: &RequesterAuth,
    ) -> Result<Vec<u8>, ProtectionError> {
        let manifest = match self.load(record_id).await {
            Ok(manifest) if manifest.policy.can_read(&auth.principal) => manifest,
            Ok(_) | Err(ProtectionError::NotFound(_)) => {
                return Err(self.refuse(&auth.principal, record_id).await)
            }
            Err(e) => return Err(e),
        };
        if !manifest.is_active() {
            return Err(ProtectionError::NotFound(record_id.clone()));
        }

        let mut stats = RetrievalStats::default();
        let mut result = self.gather(&manifest, &mut stats).await;

        // A rotation that committed mid-read erases the epoch being fetched
        if result.is_err() {
            if let Some(latest) = self.superseding(&manifest).await {
                if latest.is_active() && latest.policy.can_read(&auth.principal) {
                    debug!(
                        record_id = %record_id,
                        from_epoch = manifest.rotation_epoch,
                        to_epoch = latest.rotation_epoch,
                        "Manifest moved during retrieval, retrying"
                    );
                    result = self.gather(&latest, &mut stats).await;
                }
            }
        }

        self.report_fetches(&auth.principal, record_id, &stats.contacted)
            .await;
        Ok(result?)
    }

    async fn refuse(&self, principal: &str, record_id: &RecordId) -> ProtectionError {
        self.breach.record_unauthorized(principal, record_id).await;
        ProtectionError::Unauthorized {
            principal: principal.to_string(),
            record_id: record_id.clone(),
        }
    }

    /// A committed manifest newer than `seen`, if one exists.
    async fn superseding(&self, seen: &Manifest) -> Option<Arc<Manifest>> {
        if let Some(cached) = self.cache.get(&seen.record_id).await {
            if cached.version > seen.version {
                return Some(cached);
            }
        }
        match self.manifests.get(&seen.record_id).await {
            Ok(Some(stored)) if stored.version > seen.version => Some(Arc::new(stored)),
            Ok(_) => None,
            Err(e) => {
                warn!(record_id = %seen.record_id, "Manifest re-read failed: {}", e);
                None
            }
        }
    }

    /// Feed fragment fetches into the breach detector and carry out any
    /// resulting lock. Retrievals report themselves; node-side access logs
    /// are reported through here too.
    pub async fn report_fetches(&self, requester: &str, record_id: &RecordId, nodes: &[NodeId]) {
        let responses = self.breach.record_fetch(requester, record_id, nodes).await;
        for response in responses {
            self.respond_to_breach(response).await;
        }
    }

    /// Fetch and reconstruct from the usable holders of `manifest`.
    async fn gather(
        &self,
        manifest: &Manifest,
        stats: &mut RetrievalStats,
    ) -> Result<Vec<u8>, ReconstructionError> {
        let candidates = self.candidates(manifest).await;
        self.reconstructor
            .retrieve(
                &manifest.record_id,
                manifest.rotation_epoch,
                manifest.k as usize,
                candidates,
                stats,
            )
            .await
    }

    /// Holders worth fetching from, best first, each with its unsealed key.
    ///
    /// Unreachable, quarantined and breach-locked holders are skipped, as is
    /// any holder whose sealed key fails to open.
    async fn candidates(&self, manifest: &Manifest) -> Vec<Candidate> {
        let record_id = &manifest.record_id;
        let mut candidates = Vec::new();
        for node in self.health.ranked(&manifest.holder_ids()).await {
            let node_id = node.id().clone();
            if self.breach.is_locked(record_id, &node_id).await {
                continue;
            }
            let Some(entry) = manifest.holders.get(&node_id) else {
                continue;
            };
            let context = key_context(record_id, &node_id, manifest.rotation_epoch);
            let key = self
                .keyring
                .open_node_key(&context, &entry.sealed_key)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    let bytes = Zeroizing::new(bytes);
                    NodeKey::from_slice(&bytes).map_err(|e| e.to_string())
                });
            match key {
                Ok(key) => candidates.push(Candidate {
                    node,
                    share_index: entry.share_index,
                    key,
                }),
                Err(e) => warn!(record_id = %record_id, node_id = %node_id, "Sealed node key rejected: {}", e),
            }
        }
        candidates
    }

    // ------------------------------------------------------------------
    // delete
    // ------------------------------------------------------------------

    /// Securely delete every fragment of `record_id` and then its manifest.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: the principal may not delete this record
    /// - `PartialDeletion`: at least k holders still hold fragments; the
    ///   manifest is kept as `PendingDeletion` listing only those holders and
    ///   the call must be retried
    pub async fn delete(
        &self,
        record_id: &RecordId,
        auth: &RequesterAuth,
    ) -> Result<DeletionReceipt, ProtectionError> {
        let _guard = self.locks.lock(record_id).await;
        let manifest = self
            .manifests
            .get(record_id)
            .await?
            .ok_or_else(|| ProtectionError::NotFound(record_id.clone()))?;

        if !manifest.policy.can_delete(&auth.principal) {
            return Err(self.refuse(&auth.principal, record_id).await);
        }

        let (erased, unreached) = self.erase_epoch(&manifest).await;

        if unreached.len() >= manifest.k as usize {
            let mut pending = manifest.next_version();
            pending.state = ManifestState::PendingDeletion;
            pending.sealed_openings = None;
            pending.holders.retain(|node_id, _| unreached.contains(node_id));
            self.manifests.put(&pending).await?;
            self.cache.swap(pending).await;

            self.breach.emit(AlertEvent::PartialDeletion {
                record_id: record_id.clone(),
                unreached: unreached.clone(),
            });
            return Err(ProtectionError::PartialDeletion {
                record_id: record_id.clone(),
                unreached,
            });
        }

        // Fewer than k fragments left: dropping the manifest destroys their
        // keys, which completes the deletion.
        self.manifests.remove(record_id).await?;
        self.cache.evict(record_id).await;
        self.breach.forget_record(record_id).await;
        if !unreached.is_empty() {
            self.breach.emit(AlertEvent::PartialDeletion {
                record_id: record_id.clone(),
                unreached: unreached.clone(),
            });
        }

        info!(
            record_id = %record_id,
            erased = erased.len(),
            unreached = unreached.len(),
            "Record deleted"
        );
        Ok(DeletionReceipt {
            record_id: record_id.clone(),
            confirmed: true,
            erased,
            unreached,
        })
    }

    // ------------------------------------------------------------------
    // zero-knowledge
    // ------------------------------------------------------------------

    /// Public commitments of a record, for third-party verification.
    pub async fn commitment(&self, record_id: &RecordId) -> Result<RecordCommitment, ProtectionError> {
        Ok(self.load_active(record_id).await?.commitment.clone())
    }

    async fn openings(&self, manifest: &Manifest) -> Result<OpeningSet, ProtectionError> {
        let sealed = manifest.sealed_openings.as_ref().ok_or_else(|| {
            ProtectionError::NotFound(manifest.record_id.clone())
        })?;
        let bytes = Zeroizing::new(
            self.keyring
                .open_opening(&opening_context(&manifest.record_id), sealed)?,
        );
        Ok(OpeningSet::from_bytes(&bytes)?)
    }

    /// Prove the record is held without fetching a single fragment.
    pub async fn verify_existence(
        &self,
        record_id: &RecordId,
    ) -> Result<ExistenceProof, ProtectionError> {
        let manifest = self.load_active(record_id).await?;
        let openings = self.openings(&manifest).await?;
        Ok(openings.prove_existence(record_id, &manifest.commitment)?)
    }

    /// Prove a committed attribute satisfies `predicate`.
    pub async fn prove_attribute(
        &self,
        record_id: &RecordId,
        attribute: &str,
        predicate: Predicate,
    ) -> Result<RangeProof, ProtectionError> {
        let manifest = self.load_active(record_id).await?;
        let openings = self.openings(&manifest).await?;
        Ok(openings.prove_attribute(record_id, attribute, predicate)?)
    }

    /// Check an existence proof against the stored commitment.
    pub async fn verify(&self, proof: &ExistenceProof) -> Result<bool, ProtectionError> {
        let commitment = self.commitment(&proof.record_id).await?;
        Ok(zk::verify(proof, &commitment.record))
    }

    /// Check a range proof against the stored attribute commitment.
    pub async fn verify_attribute(&self, proof: &RangeProof) -> Result<bool, ProtectionError> {
        let commitment = self.commitment(&proof.record_id).await?;
        Ok(commitment
            .attribute(&proof.attribute)
            .is_some_and(|c| zk::verify_attribute(proof, c)))
    }

    // ------------------------------------------------------------------
    // health, rebalance and rotation
    // ------------------------------------------------------------------

    pub async fn node_health_report(&self) -> Vec<NodeStatusReport> {
        self.health.report().await
    }

    pub async fn capacity_advice(&self) -> ScalingAdvice {
        self.health.capacity_advice(self.settings.default_n).await
    }

    /// Whether a holder of `manifest` has been lost: quarantined, removed,
    /// or unreachable for longer than the grace period.
    async fn needs_rebalance(&self, manifest: &Manifest) -> bool {
        for node_id in manifest.holders.keys() {
            if self.health.node(node_id).await.is_none() || self.health.is_quarantined(node_id).await {
                return true;
            }
            if let Some(down) = self.health.unreachable_for(node_id).await {
                if down >= self.settings.rebalance_grace {
                    return true;
                }
            }
        }
        false
    }

    /// Re-split `record_id` if one of its holders has been lost.
    ///
    /// Returns `None` when every holder is still usable.
    ///
    /// # Errors
    ///
    /// - `RedundancyLost`: fewer than k valid fragments could be gathered;
    ///   an alert is raised and operator intervention is needed
    pub async fn rebalance(
        &self,
        record_id: &RecordId,
    ) -> Result<Option<ManifestRef>, ProtectionError> {
        let _guard = self.locks.lock(record_id).await;
        let manifest = self.current(record_id).await?;
        if !self.needs_rebalance(&manifest).await {
            return Ok(None);
        }
        self.rotate_locked(&manifest).await.map(Some)
    }

    /// Unconditionally re-split `record_id` under fresh node keys.
    ///
    /// Used for operator revocation and breach response. Fragments of the
    /// previous epoch are unusable afterwards: their keys are gone from the
    /// manifest and their epoch no longer matches.
    pub async fn rotate(&self, record_id: &RecordId) -> Result<ManifestRef, ProtectionError> {
        let _guard = self.locks.lock(record_id).await;
        let manifest = self.current(record_id).await?;
        self.rotate_locked(&manifest).await
    }

    /// Quarantine `node_id` and move every record it holds elsewhere.
    pub async fn revoke_node(&self, node_id: &NodeId) -> Result<SweepReport, ProtectionError> {
        if self.health.quarantine(node_id).await {
            self.breach.emit(AlertEvent::NodeQuarantined {
                node_id: node_id.clone(),
            });
        }
        self.sweep_rebalance().await
    }

    /// Authoritative active manifest, read from the replicas. Lock held.
    async fn current(&self, record_id: &RecordId) -> Result<Manifest, ProtectionError> {
        match self.manifests.get(record_id).await? {
            Some(manifest) if manifest.is_active() => Ok(manifest),
            _ => Err(ProtectionError::NotFound(record_id.clone())),
        }
    }

    async fn rotate_locked(&self, manifest: &Manifest) -> Result<ManifestRef, ProtectionError> {
        let record_id = &manifest.record_id;
        let k = manifest.k as usize;

        let mut stats = RetrievalStats::default();
        let payload = match self.gather(manifest, &mut stats).await {
            Ok(payload) => Zeroizing::new(payload),
            Err(e) => {
                warn!(record_id = %record_id, valid = stats.valid, k, "Cannot rebuild record for rotation: {}", e);
                self.breach.emit(AlertEvent::RedundancyLost {
                    record_id: record_id.clone(),
                    valid: stats.valid,
                    needed: k,
                });
                return Err(ProtectionError::RedundancyLost {
                    record_id: record_id.clone(),
                    valid: stats.valid,
                    needed: k,
                });
            }
        };

        let epoch = manifest.rotation_epoch + 1;
        let pool = self.health.healthy_pool().await;
        let locked: BTreeSet<NodeId> = {
            let mut locked = BTreeSet::new();
            for node in &pool {
                if self.breach.is_locked(record_id, node.id()).await {
                    locked.insert(node.id().clone());
                }
            }
            locked
        };
        let pool = without(pool, &locked);

        let selected = select_nodes(record_id, epoch, &pool, manifest.n as usize)?;
        let (placements, holders) = self.place(record_id, &payload, epoch, k, &selected)?;
        self.distribute(record_id, &placements).await?;

        let mut next = manifest.next_version();
        next.rotation_epoch = epoch;
        next.holders = holders;
        self.commit(&next, &placements).await?;

        let (_, unreached) = self.erase_epoch(manifest).await;
        info!(
            record_id = %record_id,
            epoch,
            stale_unreached = unreached.len(),
            "Record rotated"
        );
        Ok(next.reference())
    }

    /// Check every record against the health table and rebalance those that
    /// lost a holder.
    pub async fn sweep_rebalance(&self) -> Result<SweepReport, ProtectionError> {
        let mut report = SweepReport::default();
        for record_id in self.manifests.list().await? {
            report.checked += 1;
            match self.rebalance(&record_id).await {
                Ok(Some(_)) => report.rebalanced.push(record_id),
                Ok(None) | Err(ProtectionError::NotFound(_)) => {}
                Err(e) => report.failed.push((record_id, e.to_string())),
            }
        }
        if !report.rebalanced.is_empty() || !report.failed.is_empty() {
            info!(
                checked = report.checked,
                rebalanced = report.rebalanced.len(),
                failed = report.failed.len(),
                "Rebalance sweep finished"
            );
        }
        Ok(report)
    }

    /// Poll node health and sweep for rebalances until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.health.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.health.poll_once().await;
                    if let Err(e) = self.sweep_rebalance().await {
                        warn!("Rebalance sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("MirrorGuard stopped");
    }

    // ------------------------------------------------------------------
    // breach response and operator actions
    // ------------------------------------------------------------------

    async fn respond_to_breach(&self, response: BreachResponse) {
        warn!(node_id = %response.quarantine, reason = %response.reason, "Breach response");
        if self.health.quarantine(&response.quarantine).await {
            self.breach.emit(AlertEvent::NodeQuarantined {
                node_id: response.quarantine.clone(),
            });
        }
        for record_id in &response.rotate {
            if let Err(e) = self.rotate(record_id).await {
                self.breach.emit(AlertEvent::RotationFailed {
                    record_id: record_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    pub async fn operator_unlock(&self, record_id: &RecordId, node_id: &NodeId) -> bool {
        self.breach.operator_unlock(record_id, node_id).await
    }

    pub async fn release_quarantine(&self, node_id: &NodeId) -> bool {
        self.health.release_quarantine(node_id).await
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.breach.subscribe()
    }
}

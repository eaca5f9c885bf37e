//! Majority-replicated manifest store
//!
//! Writes go to every replica concurrently and succeed once a majority
//! acknowledges. Reads ask every replica and return the value a majority
//! agrees on, compared by SHA-256 of the encoded bytes (which covers the
//! manifest version). Replicas that disagree with the majority are repaired
//! in the background of the read.

use super::store::ManifestStore;
use super::{Manifest, ManifestError};
use crate::types::RecordId;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum number of replicas
pub const MIN_REPLICAS: usize = 3;

pub struct ReplicatedManifestStore {
    replicas: Vec<Arc<dyn ManifestStore>>,
}

impl ReplicatedManifestStore {
    /// # Errors
    ///
    /// - `TooFewReplicas`: fewer than three backends
    pub fn new(replicas: Vec<Arc<dyn ManifestStore>>) -> Result<Self, ManifestError> {
        if replicas.len() < MIN_REPLICAS {
            return Err(ManifestError::TooFewReplicas(replicas.len()));
        }
        Ok(Self { replicas })
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn majority(&self) -> usize {
        self.replicas.len() / 2 + 1
    }

    /// Write `manifest` to a majority of replicas.
    pub async fn put(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let bytes = manifest.to_bytes()?;
        let record_id = &manifest.record_id;

        let results = join_all(
            self.replicas
                .iter()
                .map(|replica| replica.put(record_id, bytes.clone())),
        )
        .await;

        let acks = self.count_acks(&results, "put");
        if acks < self.majority() {
            warn!(record_id = %record_id, acks, "Manifest write missed quorum");
            return Err(ManifestError::QuorumNotReached {
                acks,
                required: self.majority(),
            });
        }
        debug!(record_id = %record_id, version = manifest.version, acks, "Manifest written");
        Ok(())
    }

    /// Read the majority view of a manifest, `Ok(None)` if a majority holds none.
    pub async fn get(&self, record_id: &RecordId) -> Result<Option<Manifest>, ManifestError> {
        let responses = join_all(self.replicas.iter().map(|replica| replica.get(record_id))).await;

        // Votes keyed by digest; `None` is a vote for absence
        let mut votes: HashMap<Option<[u8; 32]>, (usize, Option<Vec<u8>>)> = HashMap::new();
        for response in &responses {
            match response {
                Ok(Some(bytes)) => {
                    let digest: [u8; 32] = Sha256::digest(bytes).into();
                    let entry = votes.entry(Some(digest)).or_insert((0, Some(bytes.clone())));
                    entry.0 += 1;
                }
                Ok(None) => votes.entry(None).or_insert((0, None)).0 += 1,
                Err(e) => debug!(record_id = %record_id, "Replica read failed: {}", e),
            }
        }

        let required = self.majority();
        let winner = votes
            .iter()
            .max_by_key(|(_, (count, _))| *count)
            .map(|(digest, (count, bytes))| (*digest, *count, bytes.clone()));

        let Some((digest, agreeing, bytes)) = winner else {
            return Err(ManifestError::NoMajority {
                record_id: record_id.clone(),
                agreeing: 0,
                required,
            });
        };
        if agreeing < required {
            warn!(record_id = %record_id, agreeing, required, "Manifest replicas diverge");
            return Err(ManifestError::NoMajority {
                record_id: record_id.clone(),
                agreeing,
                required,
            });
        }

        self.repair(record_id, &responses, digest, bytes.as_deref())
            .await;

        bytes.map(|b| Manifest::from_bytes(&b)).transpose()
    }

    async fn repair(
        &self,
        record_id: &RecordId,
        responses: &[Result<Option<Vec<u8>>, ManifestError>],
        winner: Option<[u8; 32]>,
        bytes: Option<&[u8]>,
    ) {
        let stale = self
            .replicas
            .iter()
            .zip(responses)
            .filter(|(_, response)| match response {
                Ok(Some(b)) => Some(<[u8; 32]>::from(Sha256::digest(b))) != winner,
                Ok(None) => winner.is_some(),
                Err(_) => false,
            })
            .map(|(replica, _)| replica.clone());

        let repairs = stale.map(|replica| async move {
            let result = match bytes {
                Some(b) => replica.put(record_id, b.to_vec()).await,
                None => replica.remove(record_id).await,
            };
            match result {
                Ok(()) => debug!(record_id = %record_id, replica = replica.name(), "Repaired manifest replica"),
                Err(e) => debug!(record_id = %record_id, replica = replica.name(), "Replica repair failed: {}", e),
            }
        });
        join_all(repairs).await;
    }

    /// Remove a manifest from a majority of replicas.
    pub async fn remove(&self, record_id: &RecordId) -> Result<(), ManifestError> {
        let results = join_all(self.replicas.iter().map(|replica| replica.remove(record_id))).await;
        let acks = self.count_acks(&results, "remove");
        if acks < self.majority() {
            return Err(ManifestError::QuorumNotReached {
                acks,
                required: self.majority(),
            });
        }
        Ok(())
    }

    /// Union of record ids across reachable replicas.
    pub async fn list(&self) -> Result<Vec<RecordId>, ManifestError> {
        let results = join_all(self.replicas.iter().map(|replica| replica.list())).await;
        let mut reachable = 0;
        let mut ids = BTreeSet::new();
        for result in results {
            if let Ok(list) = result {
                reachable += 1;
                ids.extend(list);
            }
        }
        if reachable < self.majority() {
            return Err(ManifestError::QuorumNotReached {
                acks: reachable,
                required: self.majority(),
            });
        }
        Ok(ids.into_iter().collect())
    }

    fn count_acks(&self, results: &[Result<(), ManifestError>], op: &str) -> usize {
        results
            .iter()
            .zip(&self.replicas)
            .filter(|(result, replica)| match result {
                Ok(()) => true,
                Err(e) => {
                    debug!(replica = replica.name(), op, "Replica rejected: {}", e);
                    false
                }
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::MemoryManifestStore;
    use super::super::test_support::sample_manifest;
    use super::*;

    fn replicas(count: usize) -> (Vec<Arc<MemoryManifestStore>>, ReplicatedManifestStore) {
        let stores: Vec<Arc<MemoryManifestStore>> = (0..count)
            .map(|i| Arc::new(MemoryManifestStore::new(format!("m{}", i))))
            .collect();
        let dyn_stores: Vec<Arc<dyn ManifestStore>> = stores
            .iter()
            .map(|s| s.clone() as Arc<dyn ManifestStore>)
            .collect();
        (stores, ReplicatedManifestStore::new(dyn_stores).unwrap())
    }

    #[test]
    fn test_requires_three_replicas() {
        let stores: Vec<Arc<dyn ManifestStore>> = vec![
            Arc::new(MemoryManifestStore::new("a")),
            Arc::new(MemoryManifestStore::new("b")),
        ];
        assert!(matches!(
            ReplicatedManifestStore::new(stores),
            Err(ManifestError::TooFewReplicas(2))
        ));
    }

    #[tokio::test]
    async fn test_write_read_with_one_replica_down() {
        let (stores, replicated) = replicas(3);
        let manifest = sample_manifest("r1", 1);

        stores[2].set_offline(true);
        replicated.put(&manifest).await.unwrap();
        assert_eq!(
            replicated.get(&manifest.record_id).await.unwrap(),
            Some(manifest.clone())
        );
    }

    #[tokio::test]
    async fn test_write_fails_without_majority() {
        let (stores, replicated) = replicas(3);
        stores[1].set_offline(true);
        stores[2].set_offline(true);
        assert!(matches!(
            replicated.put(&sample_manifest("r1", 1)).await,
            Err(ManifestError::QuorumNotReached { acks: 1, required: 2 })
        ));
    }

    #[tokio::test]
    async fn test_majority_outvotes_stale_replica() {
        let (stores, replicated) = replicas(3);
        let v1 = sample_manifest("r1", 1);
        let v2 = sample_manifest("r1", 2);

        replicated.put(&v1).await.unwrap();
        stores[0].set_offline(true);
        replicated.put(&v2).await.unwrap();
        stores[0].set_offline(false);

        // m0 still holds v1; the majority says v2
        assert_eq!(replicated.get(&v1.record_id).await.unwrap(), Some(v2.clone()));

        // Read repaired the stale replica
        let repaired = stores[0].get(&v1.record_id).await.unwrap().unwrap();
        assert_eq!(Manifest::from_bytes(&repaired).unwrap(), v2);
    }

    #[tokio::test]
    async fn test_divergent_replicas_no_majority() {
        let (stores, replicated) = replicas(3);
        let id = RecordId::new("r1");
        stores[0]
            .overwrite_raw(&id, sample_manifest("r1", 1).to_bytes().unwrap())
            .await;
        stores[1]
            .overwrite_raw(&id, sample_manifest("r1", 2).to_bytes().unwrap())
            .await;
        stores[2]
            .overwrite_raw(&id, sample_manifest("r1", 3).to_bytes().unwrap())
            .await;

        assert!(matches!(
            replicated.get(&id).await,
            Err(ManifestError::NoMajority { agreeing: 1, required: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_absent_manifest_is_none() {
        let (_, replicated) = replicas(3);
        assert_eq!(replicated.get(&RecordId::new("nope")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let (_, replicated) = replicas(5);
        replicated.put(&sample_manifest("r1", 1)).await.unwrap();
        replicated.put(&sample_manifest("r2", 1)).await.unwrap();
        assert_eq!(
            replicated.list().await.unwrap(),
            vec![RecordId::new("r1"), RecordId::new("r2")]
        );

        replicated.remove(&RecordId::new("r1")).await.unwrap();
        assert_eq!(replicated.list().await.unwrap(), vec![RecordId::new("r2")]);
    }
}

//! Manifest cache and per-record write locks
//!
//! Readers take an `Arc<Manifest>` snapshot and never block on writers: a
//! rebalance builds the next manifest off to the side and swaps the pointer
//! in one step, so a reader sees either the old or the new manifest, never a
//! mix. Writers serialize per record through `RecordLocks`.

use super::Manifest;
use crate::types::RecordId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
pub struct ManifestCache {
    entries: RwLock<HashMap<RecordId, Arc<Manifest>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, record_id: &RecordId) -> Option<Arc<Manifest>> {
        self.entries.read().await.get(record_id).cloned()
    }

    /// Publish a new manifest for its record.
    pub async fn swap(&self, manifest: Manifest) -> Arc<Manifest> {
        let manifest = Arc::new(manifest);
        self.entries
            .write()
            .await
            .insert(manifest.record_id.clone(), manifest.clone());
        manifest
    }

    pub async fn evict(&self, record_id: &RecordId) {
        self.entries.write().await.remove(record_id);
    }
}

/// Single-writer-per-record locks.
#[derive(Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for `record_id`.
    pub async fn lock(&self, record_id: &RecordId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds so the map does not grow without bound
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(record_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Whether a writer currently holds `record_id`.
    pub async fn is_locked(&self, record_id: &RecordId) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(record_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

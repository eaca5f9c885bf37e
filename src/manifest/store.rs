//! Manifest storage backends
//!
//! A backend is a plain key-value store of CBOR-encoded manifests keyed by
//! `record_id`. Consistency across backends is the job of
//! `ReplicatedManifestStore`; a single backend makes no promises beyond
//! last-write-wins.

use super::ManifestError;
use crate::types::RecordId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Manifest storage backend.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Write the encoded manifest for `record_id`, replacing any previous one.
    async fn put(&self, record_id: &RecordId, bytes: Vec<u8>) -> Result<(), ManifestError>;

    /// Read the encoded manifest, `Ok(None)` if absent.
    async fn get(&self, record_id: &RecordId) -> Result<Option<Vec<u8>>, ManifestError>;

    /// Remove the manifest. Removing an absent manifest succeeds.
    async fn remove(&self, record_id: &RecordId) -> Result<(), ManifestError>;

    /// All record ids held by this backend.
    async fn list(&self) -> Result<Vec<RecordId>, ManifestError>;
}

/// In-memory manifest backend with an offline switch.
pub struct MemoryManifestStore {
    name: String,
    entries: RwLock<HashMap<RecordId, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryManifestStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overwrite raw bytes, bypassing any replication (test hook for divergence).
    pub async fn overwrite_raw(&self, record_id: &RecordId, bytes: Vec<u8>) {
        self.entries.write().await.insert(record_id.clone(), bytes);
    }

    fn ensure_online(&self) -> Result<(), ManifestError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ManifestError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, record_id: &RecordId, bytes: Vec<u8>) -> Result<(), ManifestError> {
        self.ensure_online()?;
        self.entries.write().await.insert(record_id.clone(), bytes);
        Ok(())
    }

    async fn get(&self, record_id: &RecordId) -> Result<Option<Vec<u8>>, ManifestError> {
        self.ensure_online()?;
        Ok(self.entries.read().await.get(record_id).cloned())
    }

    async fn remove(&self, record_id: &RecordId) -> Result<(), ManifestError> {
        self.ensure_online()?;
        self.entries.write().await.remove(record_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RecordId>, ManifestError> {
        self.ensure_online()?;
        let mut ids: Vec<RecordId> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

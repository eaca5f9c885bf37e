//! In-process mirror node.
//!
//! Holds fragments in memory and supports fault injection (offline, failing
//! writes, corrupted reads, added latency, self-reported degradation). Used by
//! the integration tests and the `simulate` CLI command.

use super::traits::{MirrorNode, NodeDescriptor, NodeError, NodeHealthReport, ReportedStatus};
use crate::fragment::{Fragment, FragmentRef};
use crate::types::RecordId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use zeroize::Zeroize;

/// In-memory mirror node with fault injection.
pub struct MemoryNode {
    descriptor: NodeDescriptor,
    fragments: Mutex<HashMap<(RecordId, u64), Fragment>>,
    offline: AtomicBool,
    fail_writes: AtomicBool,
    corrupt_reads: AtomicBool,
    degraded: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryNode {
    pub fn new(descriptor: NodeDescriptor) -> Self {
        Self {
            descriptor,
            fragments: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            corrupt_reads: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Take the node offline (every call fails with `Unreachable`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `store` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Flip a ciphertext bit on every fetched fragment.
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.corrupt_reads.store(corrupt, Ordering::SeqCst);
    }

    /// Report `Degraded` from health probes.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    /// Add latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of fragments currently held.
    pub async fn fragment_count(&self) -> usize {
        self.fragments.lock().await.len()
    }

    /// Whether a fragment of any epoch for `record_id` is held.
    pub async fn holds(&self, record_id: &RecordId) -> bool {
        self.fragments
            .lock()
            .await
            .keys()
            .any(|(held, _)| held == record_id)
    }

    /// Whether the fragment for `record_id` at `rotation_epoch` is held.
    pub async fn holds_epoch(&self, record_id: &RecordId, rotation_epoch: u64) -> bool {
        self.fragments
            .lock()
            .await
            .contains_key(&(record_id.clone(), rotation_epoch))
    }

    /// Raw copy of every held fragment, as an attacker with disk access would see it.
    pub async fn dump(&self) -> Vec<Fragment> {
        self.fragments.lock().await.values().cloned().collect()
    }

    fn ensure_online(&self) -> Result<(), NodeError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NodeError::Unreachable(self.descriptor.node_id.clone()));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl MirrorNode for MemoryNode {
    fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    async fn store(&self, fragment: &Fragment) -> Result<(), NodeError> {
        self.ensure_online()?;
        self.simulate_latency().await;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(NodeError::Rejected(format!(
                "write failure injected on {}",
                self.descriptor.node_id
            )));
        }
        if fragment.node_id != self.descriptor.node_id {
            return Err(NodeError::Rejected(format!(
                "fragment addressed to {}, not {}",
                fragment.node_id, self.descriptor.node_id
            )));
        }

        let key = (fragment.record_id.clone(), fragment.rotation_epoch);
        let mut fragments = self.fragments.lock().await;
        if !fragments.contains_key(&key) && fragments.len() as u64 >= self.descriptor.capacity
        {
            return Err(NodeError::CapacityExceeded {
                node_id: self.descriptor.node_id.clone(),
                capacity: self.descriptor.capacity,
            });
        }
        if let Some(mut previous) = fragments.insert(key, fragment.clone()) {
            previous.ciphertext.zeroize();
        }
        Ok(())
    }

    async fn fetch(&self, fragment_ref: &FragmentRef) -> Result<Fragment, NodeError> {
        self.ensure_online()?;
        self.simulate_latency().await;

        let fragments = self.fragments.lock().await;
        let mut fragment =
            fragments
                .get(&(fragment_ref.record_id.clone(), fragment_ref.rotation_epoch))
                .cloned()
                .ok_or_else(|| NodeError::NotFound {
                    record_id: fragment_ref.record_id.to_string(),
                    node_id: self.descriptor.node_id.clone(),
                })?;

        if self.corrupt_reads.load(Ordering::SeqCst) {
            if let Some(byte) = fragment.ciphertext.first_mut() {
                *byte ^= 0x01;
            }
        }
        Ok(fragment)
    }

    async fn delete(&self, fragment_ref: &FragmentRef) -> Result<(), NodeError> {
        self.ensure_online()?;
        self.simulate_latency().await;

        let mut fragments = self.fragments.lock().await;
        if let Some(mut removed) = fragments.remove(&(fragment_ref.record_id.clone(), fragment_ref.rotation_epoch)) {
            removed.ciphertext.zeroize();
            removed.mac.zeroize();
            removed.nonce.zeroize();
        }
        Ok(())
    }

    async fn health(&self) -> Result<NodeHealthReport, NodeError> {
        self.ensure_online()?;
        self.simulate_latency().await;

        let held = self.fragments.lock().await.len() as f64;
        let load = if self.descriptor.capacity == 0 {
            1.0
        } else {
            (held / self.descriptor.capacity as f64).min(1.0)
        };
        let status = if self.degraded.load(Ordering::SeqCst) {
            ReportedStatus::Degraded
        } else {
            ReportedStatus::Ok
        };

        Ok(NodeHealthReport {
            status,
            load,
            latency: Duration::from_millis(self.latency_ms.load(Ordering::SeqCst)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{encrypt, NodeKey};
    use crate::sharing::split;
    use crate::types::NodeId;

    fn node(capacity: u64) -> MemoryNode {
        MemoryNode::new(NodeDescriptor::new("node-a", "eu-west", "op-1", capacity))
    }

    fn fragment_for(record: &str, node_id: &str) -> Fragment {
        fragment_at(record, node_id, 0)
    }

    fn fragment_at(record: &str, node_id: &str, epoch: u64) -> Fragment {
        let share = split(b"memory node", 3, 2).unwrap().remove(0);
        encrypt(
            &share,
            &RecordId::new(record),
            &NodeId::new(node_id),
            epoch,
            &NodeKey::generate().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_fetch_delete() {
        let node = node(10);
        let fragment = fragment_for("r1", "node-a");

        node.store(&fragment).await.unwrap();
        assert_eq!(node.fetch(&fragment.reference()).await.unwrap(), fragment);

        node.delete(&fragment.reference()).await.unwrap();
        assert!(matches!(
            node.fetch(&fragment.reference()).await,
            Err(NodeError::NotFound { .. })
        ));
        // Idempotent
        node.delete(&fragment.reference()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_misaddressed_fragment() {
        let node = node(10);
        let fragment = fragment_for("r1", "node-b");
        assert!(matches!(
            node.store(&fragment).await,
            Err(NodeError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let node = node(1);
        node.store(&fragment_for("r1", "node-a")).await.unwrap();
        assert!(matches!(
            node.store(&fragment_for("r2", "node-a")).await,
            Err(NodeError::CapacityExceeded { .. })
        ));
        // Overwriting an existing slot does not count against capacity
        node.store(&fragment_for("r1", "node-a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_node_unreachable() {
        let node = node(10);
        node.set_offline(true);
        assert!(matches!(
            node.health().await,
            Err(NodeError::Unreachable(_))
        ));
        node.set_offline(false);
        let report = node.health().await.unwrap();
        assert_eq!(report.status, ReportedStatus::Ok);
        assert_eq!(report.load, 0.0);
    }

    #[tokio::test]
    async fn test_corrupt_reads_flip_ciphertext() {
        let node = node(10);
        let fragment = fragment_for("r1", "node-a");
        node.store(&fragment).await.unwrap();
        node.set_corrupt_reads(true);
        let fetched = node.fetch(&fragment.reference()).await.unwrap();
        assert_ne!(fetched.ciphertext, fragment.ciphertext);
    }

    #[tokio::test]
    async fn test_epochs_are_separate_slots() {
        let node = node(10);
        let old = fragment_at("r1", "node-a", 0);
        let new = fragment_at("r1", "node-a", 1);
        node.store(&old).await.unwrap();
        node.store(&new).await.unwrap();
        assert_eq!(node.fragment_count().await, 2);

        node.delete(&old.reference()).await.unwrap();
        assert!(!node.holds_epoch(&RecordId::new("r1"), 0).await);
        assert_eq!(node.fetch(&new.reference()).await.unwrap(), new);
        assert!(node.holds(&RecordId::new("r1")).await);
    }
}

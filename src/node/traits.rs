//! Mirror node capability interface
//!
//! Every storage backend implements the same four operations. Nodes are
//! fungible: none is privileged, and the router, health monitor and
//! reconstruction service only ever see `Arc<dyn MirrorNode>`.
//!
//! ## Storage Model
//!
//! - One fragment per `(record_id, rotation_epoch)` slot on each node
//! - `store` overwrites the slot (re-protection replaces, never patches)
//! - `delete` is a secure delete and idempotent

use crate::fragment::{Fragment, FragmentRef};
use crate::types::NodeId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during node operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Node unreachable: {0}")]
    Unreachable(NodeId),

    #[error("Fragment not found: record={record_id} node={node_id}")]
    NotFound {
        record_id: String,
        node_id: NodeId,
    },

    #[error("Node {node_id} at capacity ({capacity} fragments)")]
    CapacityExceeded { node_id: NodeId, capacity: u64 },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Rejected by node: {0}")]
    Rejected(String),
}

/// Static description of a mirror node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: NodeId,

    /// Network endpoint (informational for in-process backends)
    pub endpoint: String,

    /// Maximum number of fragments the node accepts
    pub capacity: u64,

    /// Geographic region, used for placement diversity
    pub region: String,

    /// Operating organisation, used for placement diversity
    pub operator: String,
}

impl NodeDescriptor {
    pub fn new(
        node_id: impl Into<String>,
        region: impl Into<String>,
        operator: impl Into<String>,
        capacity: u64,
    ) -> Self {
        let node_id = NodeId::new(node_id);
        Self {
            endpoint: format!("mem://{}", node_id),
            node_id,
            capacity,
            region: region.into(),
            operator: operator.into(),
        }
    }
}

/// Self-reported node condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Ok,
    Degraded,
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthReport {
    pub status: ReportedStatus,

    /// Fraction of capacity in use (0.0 - 1.0)
    pub load: f64,

    /// Round-trip latency observed by the node
    pub latency: Duration,
}

/// Storage endpoint capability.
#[async_trait]
pub trait MirrorNode: Send + Sync {
    /// Static description of this node.
    fn descriptor(&self) -> &NodeDescriptor;

    /// Node identifier.
    fn id(&self) -> &NodeId {
        &self.descriptor().node_id
    }

    /// Persist a fragment in its `(record_id, rotation_epoch)` slot.
    async fn store(&self, fragment: &Fragment) -> Result<(), NodeError>;

    /// Fetch the fragment at `fragment_ref`.
    async fn fetch(&self, fragment_ref: &FragmentRef) -> Result<Fragment, NodeError>;

    /// Securely erase the fragment at `fragment_ref`.
    ///
    /// Returns `Ok(())` if the fragment was erased or never existed.
    async fn delete(&self, fragment_ref: &FragmentRef) -> Result<(), NodeError>;

    /// Probe the node's health.
    async fn health(&self) -> Result<NodeHealthReport, NodeError>;
}

/// Run a node call under a deadline, mapping expiry to `NodeError::Timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout(deadline.as_millis() as u64)),
    }
}

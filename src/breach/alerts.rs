//! Alerts published to operators.

use crate::types::{NodeId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub at: Timestamp,
    pub event: AlertEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertEvent {
    Suspicious {
        record_id: RecordId,
        node_id: NodeId,
        reason: String,
    },
    BreachLocked {
        record_id: RecordId,
        node_id: NodeId,
        reason: String,
    },
    UnauthorizedBurst {
        requester: String,
        attempts: usize,
    },
    /// Fewer than k valid fragments could be gathered
    RedundancyLost {
        record_id: RecordId,
        valid: usize,
        needed: usize,
    },
    /// Deletion could not reach every holder
    PartialDeletion {
        record_id: RecordId,
        unreached: Vec<NodeId>,
    },
    DistributionRolledBack {
        record_id: RecordId,
        failed: Vec<NodeId>,
        orphaned: Vec<NodeId>,
    },
    NodeQuarantined {
        node_id: NodeId,
    },
    RotationFailed {
        record_id: RecordId,
        reason: String,
    },
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertEvent::Suspicious {
                record_id,
                node_id,
                reason,
            } => write!(f, "suspicious access to {} on {}: {}", record_id, node_id, reason),
            AlertEvent::BreachLocked {
                record_id,
                node_id,
                reason,
            } => write!(f, "locked {} on {}: {}", record_id, node_id, reason),
            AlertEvent::UnauthorizedBurst {
                requester,
                attempts,
            } => write!(f, "{} unauthorized attempts by {}", attempts, requester),
            AlertEvent::RedundancyLost {
                record_id,
                valid,
                needed,
            } => write!(
                f,
                "redundancy lost for {}: {} valid of {} needed",
                record_id, valid, needed
            ),
            AlertEvent::PartialDeletion {
                record_id,
                unreached,
            } => write!(
                f,
                "partial deletion of {}: {} holders unreached",
                record_id,
                unreached.len()
            ),
            AlertEvent::DistributionRolledBack {
                record_id,
                failed,
                orphaned,
            } => write!(
                f,
                "distribution of {} rolled back ({} failed, {} orphaned)",
                record_id,
                failed.len(),
                orphaned.len()
            ),
            AlertEvent::NodeQuarantined { node_id } => write!(f, "node {} quarantined", node_id),
            AlertEvent::RotationFailed { record_id, reason } => {
                write!(f, "rotation of {} failed: {}", record_id, reason)
            }
        }
    }
}

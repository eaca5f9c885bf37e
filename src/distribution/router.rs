//! Fragment Router / Distributor
//!
//! ## Selection
//!
//! Candidates are ordered by rendezvous score, then picked greedily for
//! diversity: a node in an unused region wins over one in an unused operator,
//! which wins over a node sharing both. Ties go to rendezvous order. A node is
//! never picked twice, so no node ever holds two fragments of one record.
//!
//! ## Distribution
//!
//! Stores fan out concurrently, each under the per-node deadline. The quorum
//! is every placement: if any store fails, every fragment of the batch is
//! deleted again and nothing is committed.

use super::rendezvous;
use crate::fragment::{Fragment, FragmentRef};
use crate::node::{with_deadline, MirrorNode, NodeError};
use crate::types::{NodeId, RecordId};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from placement and distribution
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("Insufficient capacity: need {needed} nodes, {available} available")]
    InsufficientCapacity { needed: usize, available: usize },

    #[error("Fragment stores failed on {failed:?}; batch rolled back")]
    StoreFailed {
        failed: Vec<NodeId>,
        /// Nodes where rollback deletion also failed
        orphaned: Vec<NodeId>,
    },
}

/// One fragment bound to the node that will hold it.
#[derive(Clone)]
pub struct Placement {
    pub node: Arc<dyn MirrorNode>,
    pub fragment: Fragment,
}

/// Pick `n` distinct nodes for `record_id` from `pool`.
///
/// # Errors
///
/// - `InsufficientCapacity`: fewer than `n` nodes in the pool
pub fn select_nodes(
    record_id: &RecordId,
    epoch: u64,
    pool: &[Arc<dyn MirrorNode>],
    n: usize,
) -> Result<Vec<Arc<dyn MirrorNode>>, DistributionError> {
    let by_id: HashMap<&NodeId, &Arc<dyn MirrorNode>> =
        pool.iter().map(|node| (node.id(), node)).collect();
    if by_id.len() < n {
        return Err(DistributionError::InsufficientCapacity {
            needed: n,
            available: by_id.len(),
        });
    }

    let ids: Vec<NodeId> = by_id.keys().map(|id| (*id).clone()).collect();
    let mut remaining: Vec<&NodeId> = rendezvous::rank(record_id, &ids, epoch);

    let mut regions: HashSet<String> = HashSet::new();
    let mut operators: HashSet<String> = HashSet::new();
    let mut selected = Vec::with_capacity(n);

    while selected.len() < n {
        let (position, _) = remaining
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let descriptor = by_id[*id].descriptor();
                let novelty = 2 * u8::from(!regions.contains(&descriptor.region))
                    + u8::from(!operators.contains(&descriptor.operator));
                (i, novelty)
            })
            // max_by_key keeps the last maximum; reverse so earlier rank wins
            .rev()
            .max_by_key(|(_, novelty)| *novelty)
            .ok_or(DistributionError::InsufficientCapacity {
                needed: n,
                available: selected.len(),
            })?;

        let id = remaining.remove(position);
        let node = by_id[id].clone();
        regions.insert(node.descriptor().region.clone());
        operators.insert(node.descriptor().operator.clone());
        selected.push(node);
    }

    debug!(
        record_id = %record_id,
        n,
        regions = regions.len(),
        operators = operators.len(),
        "Selected fragment holders"
    );
    Ok(selected)
}

/// Fans fragment writes and erasures out to nodes under a per-node deadline.
#[derive(Debug, Clone)]
pub struct Distributor {
    node_timeout: Duration,
}

impl Distributor {
    pub fn new(node_timeout: Duration) -> Self {
        Self { node_timeout }
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Store every placement or none.
    ///
    /// On any failure the batch is rolled back: every node in the batch gets
    /// a delete, including nodes whose store timed out (the write may still
    /// land).
    pub async fn distribute(&self, placements: &[Placement]) -> Result<(), DistributionError> {
        let results = join_all(placements.iter().map(|p| {
            with_deadline(self.node_timeout, p.node.store(&p.fragment))
        }))
        .await;

        let failed: Vec<NodeId> = placements
            .iter()
            .zip(&results)
            .filter_map(|(p, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(node_id = %p.node.id(), record_id = %p.fragment.record_id, "Fragment store failed: {}", e);
                    Some(p.node.id().clone())
                }
            })
            .collect();

        if failed.is_empty() {
            if let Some(first) = placements.first() {
                info!(
                    record_id = %first.fragment.record_id,
                    n = placements.len(),
                    "Fragments distributed"
                );
            }
            return Ok(());
        }

        let targets: Vec<(Arc<dyn MirrorNode>, FragmentRef)> = placements
            .iter()
            .map(|p| (p.node.clone(), p.fragment.reference()))
            .collect();
        let orphaned: Vec<NodeId> = self
            .erase(&targets)
            .await
            .into_iter()
            .filter_map(|(node_id, result)| result.err().map(|_| node_id))
            .collect();

        warn!(
            failed = failed.len(),
            orphaned = orphaned.len(),
            "Distribution rolled back"
        );
        Err(DistributionError::StoreFailed { failed, orphaned })
    }

    /// Secure-delete each fragment, reporting the outcome per node.
    pub async fn erase(
        &self,
        targets: &[(Arc<dyn MirrorNode>, FragmentRef)],
    ) -> Vec<(NodeId, Result<(), NodeError>)> {
        let results = join_all(
            targets
                .iter()
                .map(|(node, fragment_ref)| with_deadline(self.node_timeout, node.delete(fragment_ref))),
        )
        .await;

        targets
            .iter()
            .zip(results)
            .map(|((node, _), result)| {
                if let Err(e) = &result {
                    debug!(node_id = %node.id(), "Fragment delete failed: {}", e);
                }
                (node.id().clone(), result)
            })
            .collect()
    }
}

/// Node ids of `pool` not in `exclude`.
pub fn without(
    pool: Vec<Arc<dyn MirrorNode>>,
    exclude: &BTreeSet<NodeId>,
) -> Vec<Arc<dyn MirrorNode>> {
    pool.into_iter()
        .filter(|node| !exclude.contains(node.id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{encrypt, NodeKey};
    use crate::node::{MemoryNode, NodeDescriptor};
    use crate::sharing::split;

    fn node(id: &str, region: &str, operator: &str) -> Arc<MemoryNode> {
        Arc::new(MemoryNode::new(NodeDescriptor::new(id, region, operator, 100)))
    }

    fn as_dyn(nodes: &[Arc<MemoryNode>]) -> Vec<Arc<dyn MirrorNode>> {
        nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn MirrorNode>)
            .collect()
    }

    fn placements(record: &RecordId, nodes: &[Arc<dyn MirrorNode>]) -> Vec<Placement> {
        let shares = split(b"router payload", nodes.len(), 2).unwrap();
        shares
            .iter()
            .zip(nodes)
            .map(|(share, node)| Placement {
                node: node.clone(),
                fragment: encrypt(share, record, node.id(), 0, &NodeKey::generate().unwrap())
                    .unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_insufficient_capacity() {
        let pool = as_dyn(&[node("a", "eu", "x"), node("b", "eu", "x")]);
        assert_eq!(
            select_nodes(&RecordId::new("r1"), 0, &pool, 3).err().unwrap(),
            DistributionError::InsufficientCapacity {
                needed: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_selection_is_distinct_and_deterministic() {
        let pool = as_dyn(&(0..8)
            .map(|i| node(&format!("n{}", i), "eu", "x"))
            .collect::<Vec<_>>());
        let record = RecordId::new("r1");

        let a: Vec<NodeId> = select_nodes(&record, 0, &pool, 5)
            .unwrap()
            .iter()
            .map(|n| n.id().clone())
            .collect();
        let b: Vec<NodeId> = select_nodes(&record, 0, &pool, 5)
            .unwrap()
            .iter()
            .map(|n| n.id().clone())
            .collect();

        assert_eq!(a, b);
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 5);
    }

    #[test]
    fn test_selection_maximizes_region_diversity() {
        // Three regions, many nodes in one of them
        let mut nodes = vec![node("us-1", "us", "op-a"), node("ap-1", "ap", "op-b")];
        for i in 0..6 {
            nodes.push(node(&format!("eu-{}", i), "eu", "op-c"));
        }
        let pool = as_dyn(&nodes);

        for i in 0..20 {
            let selected = select_nodes(&RecordId::new(format!("r{}", i)), 0, &pool, 3).unwrap();
            let regions: HashSet<String> = selected
                .iter()
                .map(|n| n.descriptor().region.clone())
                .collect();
            assert_eq!(regions.len(), 3, "record r{} not spread over regions", i);
        }
    }

    #[test]
    fn test_selection_uses_operator_diversity_within_region() {
        let pool = as_dyn(&[
            node("a", "eu", "op-1"),
            node("b", "eu", "op-1"),
            node("c", "eu", "op-2"),
        ]);
        let selected = select_nodes(&RecordId::new("r1"), 0, &pool, 2).unwrap();
        let operators: HashSet<String> = selected
            .iter()
            .map(|n| n.descriptor().operator.clone())
            .collect();
        assert_eq!(operators.len(), 2);
    }

    #[tokio::test]
    async fn test_distribute_all_or_nothing() {
        let nodes: Vec<Arc<MemoryNode>> = (0..5)
            .map(|i| node(&format!("n{}", i), "eu", "x"))
            .collect();
        let record = RecordId::new("r1");
        let batch = placements(&record, &as_dyn(&nodes));

        nodes[3].set_fail_writes(true);
        nodes[4].set_offline(true);

        let distributor = Distributor::new(Duration::from_secs(1));
        let err = distributor.distribute(&batch).await.unwrap_err();
        match err {
            DistributionError::StoreFailed { failed, .. } => {
                assert_eq!(failed, vec![NodeId::new("n3"), NodeId::new("n4")]);
            }
            other => panic!("unexpected error {:?}", other),
        }

        for n in &nodes[..3] {
            assert!(!n.holds(&record).await, "{} kept a fragment", n.id());
        }
    }

    #[tokio::test]
    async fn test_distribute_times_out_slow_node() {
        let nodes: Vec<Arc<MemoryNode>> = (0..3)
            .map(|i| node(&format!("n{}", i), "eu", "x"))
            .collect();
        nodes[2].set_latency(Duration::from_millis(500));
        let record = RecordId::new("r1");
        let batch = placements(&record, &as_dyn(&nodes));

        let distributor = Distributor::new(Duration::from_millis(50));
        assert!(matches!(
            distributor.distribute(&batch).await,
            Err(DistributionError::StoreFailed { .. })
        ));
        assert!(!nodes[0].holds(&record).await);
    }

    #[tokio::test]
    async fn test_distribute_success() {
        let nodes: Vec<Arc<MemoryNode>> = (0..3)
            .map(|i| node(&format!("n{}", i), "eu", "x"))
            .collect();
        let record = RecordId::new("r1");
        let batch = placements(&record, &as_dyn(&nodes));

        Distributor::new(Duration::from_secs(1))
            .distribute(&batch)
            .await
            .unwrap();
        for n in &nodes {
            assert!(n.holds(&record).await);
        }
    }
}

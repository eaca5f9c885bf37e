//! Node Health Monitor
//!
//! Polls every registered mirror node, keeps an exponentially weighted health
//! score per node and classifies nodes for the router and the reconstruction
//! service.
//!
//! ## Classification
//!
//! - **Healthy**: answered the last poll, load and latency within budget
//! - **Degraded**: answered, but reports degraded, runs hot, or scores low
//! - **Unreachable**: `failure_threshold` consecutive polls failed
//!
//! Leaving `Unreachable` needs `recovery_threshold` consecutive successes so a
//! flapping node does not bounce in and out of the selection pool.
//!
//! ## Locking
//!
//! The node table is a `RwLock` guarding membership only. Each node carries
//! its own `Mutex<NodeState>`, so a poll result for one node never blocks
//! readers of another.

use super::traits::{with_deadline, MirrorNode, NodeError, NodeHealthReport, ReportedStatus};
use crate::types::NodeId;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for polling and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Interval between polls in `run`
    pub poll_interval: Duration,

    /// Deadline for one `health()` probe
    pub probe_timeout: Duration,

    /// EWMA smoothing factor (weight of the newest sample)
    pub alpha: f64,

    /// Consecutive failures before a node is marked unreachable
    pub failure_threshold: u32,

    /// Consecutive successes before an unreachable node is readmitted
    pub recovery_threshold: u32,

    /// Load at or above which a node is degraded
    pub degraded_load: f64,

    /// Score below which a node is degraded
    pub score_threshold: f64,

    /// Latency above which a node is degraded
    pub latency_budget: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            alpha: 0.3,
            failure_threshold: 3,
            recovery_threshold: 2,
            degraded_load: 0.9,
            score_threshold: 0.5,
            latency_budget: Duration::from_millis(500),
        }
    }
}

/// Node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Healthy,
    Degraded,
    Unreachable,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Healthy => "healthy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Unreachable => "unreachable",
        }
    }
}

/// Read-only view of one node for operator tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub load: f64,
    pub score: f64,
    pub region: String,
    pub operator: String,
    pub quarantined: bool,
}

/// What the auto-scaler should do with the healthy pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingAction {
    Hold,
    ScaleUp(usize),
    ScaleDown(usize),
}

/// Capacity recommendation derived from the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingAdvice {
    /// Healthy, non-quarantined nodes
    pub healthy: usize,

    /// Nodes needed to place a record at the target width plus headroom
    pub required: usize,

    pub action: ScalingAction,
}

#[derive(Debug, Clone)]
struct NodeState {
    status: NodeStatus,
    score: f64,
    load: f64,
    latency: Duration,
    consecutive_failures: u32,
    consecutive_successes: u32,
    unreachable_since: Option<Instant>,
    quarantined: bool,
}

impl NodeState {
    fn new() -> Self {
        Self {
            status: NodeStatus::Healthy,
            score: 1.0,
            load: 0.0,
            latency: Duration::ZERO,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unreachable_since: None,
            quarantined: false,
        }
    }
}

struct TrackedNode {
    node: Arc<dyn MirrorNode>,
    state: Mutex<NodeState>,
}

/// Health monitor over an injected set of mirror nodes.
pub struct HealthMonitor {
    policy: HealthPolicy,
    nodes: RwLock<HashMap<NodeId, Arc<TrackedNode>>>,
}

impl HealthMonitor {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Add a node to the table. Re-registering an id replaces the backend
    /// and resets its state.
    pub async fn register(&self, node: Arc<dyn MirrorNode>) {
        let node_id = node.id().clone();
        let tracked = Arc::new(TrackedNode {
            node,
            state: Mutex::new(NodeState::new()),
        });
        self.nodes.write().await.insert(node_id.clone(), tracked);
        info!(node_id = %node_id, "Registered mirror node");
    }

    /// Remove a node from the table.
    pub async fn deregister(&self, node_id: &NodeId) -> Option<Arc<dyn MirrorNode>> {
        let removed = self.nodes.write().await.remove(node_id);
        if removed.is_some() {
            info!(node_id = %node_id, "Deregistered mirror node");
        }
        removed.map(|tracked| tracked.node.clone())
    }

    async fn tracked(&self, node_id: &NodeId) -> Option<Arc<TrackedNode>> {
        self.nodes.read().await.get(node_id).cloned()
    }

    async fn all_tracked(&self) -> Vec<Arc<TrackedNode>> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Backend for a registered node.
    pub async fn node(&self, node_id: &NodeId) -> Option<Arc<dyn MirrorNode>> {
        self.tracked(node_id).await.map(|t| t.node.clone())
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn status(&self, node_id: &NodeId) -> Option<NodeStatus> {
        let tracked = self.tracked(node_id).await?;
        let state = tracked.state.lock().await;
        Some(state.status)
    }

    pub async fn score(&self, node_id: &NodeId) -> Option<f64> {
        let tracked = self.tracked(node_id).await?;
        let state = tracked.state.lock().await;
        Some(state.score)
    }

    /// Poll every node once, concurrently, each under `probe_timeout`.
    pub async fn poll_once(&self) {
        let tracked = self.all_tracked().await;
        let timeout = self.policy.probe_timeout;

        let probes = tracked.iter().map(|t| async move {
            let outcome = with_deadline(timeout, t.node.health()).await;
            self.apply(t, outcome).await;
        });
        join_all(probes).await;
    }

    /// Record one probe outcome for `node_id`.
    ///
    /// Exposed so callers that observe a node failing outside of a poll can
    /// feed the same state machine.
    pub async fn observe(&self, node_id: &NodeId, outcome: Result<NodeHealthReport, NodeError>) {
        if let Some(tracked) = self.tracked(node_id).await {
            self.apply(&tracked, outcome).await;
        }
    }

    async fn apply(&self, tracked: &TrackedNode, outcome: Result<NodeHealthReport, NodeError>) {
        let node_id = tracked.node.id();
        let mut state = tracked.state.lock().await;
        let previous = state.status;
        let alpha = self.policy.alpha;

        match outcome {
            Ok(report) => {
                state.consecutive_failures = 0;
                state.consecutive_successes = state.consecutive_successes.saturating_add(1);
                state.load = report.load.clamp(0.0, 1.0);
                state.latency = report.latency;

                let sample = self.sample_score(&report);
                state.score = alpha * sample + (1.0 - alpha) * state.score;

                let readmit = previous != NodeStatus::Unreachable
                    || state.consecutive_successes >= self.policy.recovery_threshold;
                if readmit {
                    state.status = self.classify(&report, state.score);
                    state.unreachable_since = None;
                }
            }
            Err(e) => {
                state.consecutive_successes = 0;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.score *= 1.0 - alpha;
                debug!(node_id = %node_id, failures = state.consecutive_failures, "Health probe failed: {}", e);

                if state.consecutive_failures >= self.policy.failure_threshold
                    && previous != NodeStatus::Unreachable
                {
                    state.status = NodeStatus::Unreachable;
                    state.unreachable_since = Some(Instant::now());
                }
            }
        }

        if state.status != previous {
            match state.status {
                NodeStatus::Unreachable => {
                    warn!(node_id = %node_id, score = state.score, "Node marked unreachable")
                }
                status => info!(
                    node_id = %node_id,
                    from = previous.as_str(),
                    to = status.as_str(),
                    "Node status changed"
                ),
            }
        }
    }

    fn sample_score(&self, report: &NodeHealthReport) -> f64 {
        let budget = self.policy.latency_budget.as_secs_f64();
        let latency_penalty = if budget > 0.0 {
            (report.latency.as_secs_f64() / budget * 0.3).min(0.3)
        } else {
            0.0
        };
        let status_penalty = match report.status {
            ReportedStatus::Ok => 0.0,
            ReportedStatus::Degraded => 0.2,
        };
        (1.0 - 0.5 * report.load.clamp(0.0, 1.0) - latency_penalty - status_penalty).max(0.0)
    }

    fn classify(&self, report: &NodeHealthReport, score: f64) -> NodeStatus {
        if report.status == ReportedStatus::Degraded
            || report.load >= self.policy.degraded_load
            || score < self.policy.score_threshold
            || report.latency > self.policy.latency_budget
        {
            NodeStatus::Degraded
        } else {
            NodeStatus::Healthy
        }
    }

    /// Poll on `poll_interval` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.policy.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }

    /// Nodes eligible for placement: healthy and not quarantined.
    pub async fn healthy_pool(&self) -> Vec<Arc<dyn MirrorNode>> {
        let mut pool = Vec::new();
        for tracked in self.all_tracked().await {
            let state = tracked.state.lock().await;
            if state.status == NodeStatus::Healthy && !state.quarantined {
                pool.push(tracked.node.clone());
            }
        }
        pool
    }

    /// Of `holders`, the nodes worth reading from, best first.
    ///
    /// Unreachable and quarantined nodes are left out. Healthy nodes sort
    /// before degraded ones, then by score.
    pub async fn ranked(&self, holders: &[NodeId]) -> Vec<Arc<dyn MirrorNode>> {
        let mut candidates = Vec::new();
        for node_id in holders {
            let Some(tracked) = self.tracked(node_id).await else {
                continue;
            };
            let state = tracked.state.lock().await;
            if state.status == NodeStatus::Unreachable || state.quarantined {
                continue;
            }
            candidates.push((state.status == NodeStatus::Healthy, state.score, tracked.node.clone()));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.total_cmp(&a.1)));
        candidates.into_iter().map(|(_, _, node)| node).collect()
    }

    /// How long `node_id` has been unreachable, if it is.
    pub async fn unreachable_for(&self, node_id: &NodeId) -> Option<Duration> {
        let tracked = self.tracked(node_id).await?;
        let state = tracked.state.lock().await;
        state.unreachable_since.map(|since| since.elapsed())
    }

    /// Whether `node_id` is usable as a holder (known, reachable, not quarantined).
    pub async fn is_usable(&self, node_id: &NodeId) -> bool {
        match self.tracked(node_id).await {
            Some(tracked) => {
                let state = tracked.state.lock().await;
                state.status != NodeStatus::Unreachable && !state.quarantined
            }
            None => false,
        }
    }

    /// Remove a node from the selection pool until an operator releases it.
    pub async fn quarantine(&self, node_id: &NodeId) -> bool {
        let Some(tracked) = self.tracked(node_id).await else {
            return false;
        };
        let mut state = tracked.state.lock().await;
        if !state.quarantined {
            warn!(node_id = %node_id, "Node quarantined");
        }
        state.quarantined = true;
        true
    }

    /// Lift a quarantine. Operator action only.
    pub async fn release_quarantine(&self, node_id: &NodeId) -> bool {
        let Some(tracked) = self.tracked(node_id).await else {
            return false;
        };
        let mut state = tracked.state.lock().await;
        let was = state.quarantined;
        state.quarantined = false;
        if was {
            info!(node_id = %node_id, "Node released from quarantine");
        }
        was
    }

    pub async fn is_quarantined(&self, node_id: &NodeId) -> bool {
        match self.tracked(node_id).await {
            Some(tracked) => tracked.state.lock().await.quarantined,
            None => false,
        }
    }

    /// Snapshot of every node, sorted by id.
    pub async fn report(&self) -> Vec<NodeStatusReport> {
        let mut reports = Vec::new();
        for tracked in self.all_tracked().await {
            let state = tracked.state.lock().await;
            let descriptor = tracked.node.descriptor();
            reports.push(NodeStatusReport {
                node_id: descriptor.node_id.clone(),
                status: state.status,
                load: state.load,
                score: state.score,
                region: descriptor.region.clone(),
                operator: descriptor.operator.clone(),
                quarantined: state.quarantined,
            });
        }
        reports.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        reports
    }

    /// Scaling recommendation for placing records `target_n` wide.
    ///
    /// Keeps one spare node above `target_n` so a single failure does not
    /// block new placements; recommends shrinking only when the healthy pool
    /// is more than twice what is required.
    pub async fn capacity_advice(&self, target_n: usize) -> ScalingAdvice {
        let healthy = self.healthy_pool().await.len();
        let required = target_n + 1;
        let action = if healthy < required {
            ScalingAction::ScaleUp(required - healthy)
        } else if healthy > required * 2 {
            ScalingAction::ScaleDown(healthy - required * 2)
        } else {
            ScalingAction::Hold
        };
        ScalingAdvice {
            healthy,
            required,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::memory::MemoryNode;
    use crate::node::traits::NodeDescriptor;

    fn node(id: &str) -> Arc<MemoryNode> {
        Arc::new(MemoryNode::new(NodeDescriptor::new(id, "eu", "op", 100)))
    }

    async fn monitor_with(nodes: &[Arc<MemoryNode>]) -> HealthMonitor {
        let monitor = HealthMonitor::new(HealthPolicy::default());
        for n in nodes {
            monitor.register(n.clone()).await;
        }
        monitor
    }

    #[tokio::test]
    async fn test_new_node_starts_healthy() {
        let a = node("a");
        let monitor = monitor_with(&[a]).await;
        assert_eq!(monitor.status(&NodeId::new("a")).await, Some(NodeStatus::Healthy));
        assert_eq!(monitor.healthy_pool().await.len(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_demote() {
        let a = node("a");
        let monitor = monitor_with(&[a.clone()]).await;
        let id = NodeId::new("a");
        a.set_offline(true);

        monitor.poll_once().await;
        monitor.poll_once().await;
        assert_ne!(monitor.status(&id).await, Some(NodeStatus::Unreachable));

        monitor.poll_once().await;
        assert_eq!(monitor.status(&id).await, Some(NodeStatus::Unreachable));
        assert!(monitor.unreachable_for(&id).await.is_some());
        assert!(monitor.healthy_pool().await.is_empty());
    }

    #[tokio::test]
    async fn test_recovery_needs_two_successes() {
        let a = node("a");
        let monitor = monitor_with(&[a.clone()]).await;
        let id = NodeId::new("a");

        a.set_offline(true);
        for _ in 0..3 {
            monitor.poll_once().await;
        }
        a.set_offline(false);

        monitor.poll_once().await;
        assert_eq!(monitor.status(&id).await, Some(NodeStatus::Unreachable));

        monitor.poll_once().await;
        assert_ne!(monitor.status(&id).await, Some(NodeStatus::Unreachable));
        assert!(monitor.unreachable_for(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_flapping_node_stays_unreachable() {
        let a = node("a");
        let monitor = monitor_with(&[a.clone()]).await;
        let id = NodeId::new("a");

        a.set_offline(true);
        for _ in 0..3 {
            monitor.poll_once().await;
        }
        for _ in 0..4 {
            a.set_offline(false);
            monitor.poll_once().await;
            a.set_offline(true);
            monitor.poll_once().await;
        }
        assert_eq!(monitor.status(&id).await, Some(NodeStatus::Unreachable));
    }

    #[tokio::test]
    async fn test_self_reported_degradation() {
        let a = node("a");
        let monitor = monitor_with(&[a.clone()]).await;
        a.set_degraded(true);
        monitor.poll_once().await;
        assert_eq!(monitor.status(&NodeId::new("a")).await, Some(NodeStatus::Degraded));
        assert!(monitor.healthy_pool().await.is_empty());
        // Degraded nodes still serve reads
        assert_eq!(monitor.ranked(&[NodeId::new("a")]).await.len(), 1);
    }

    #[tokio::test]
    async fn test_quarantine_excludes_from_pool() {
        let a = node("a");
        let b = node("b");
        let monitor = monitor_with(&[a, b]).await;
        let id = NodeId::new("a");

        assert!(monitor.quarantine(&id).await);
        let pool: Vec<NodeId> = monitor
            .healthy_pool()
            .await
            .iter()
            .map(|n| n.id().clone())
            .collect();
        assert_eq!(pool, vec![NodeId::new("b")]);

        // Polling never lifts a quarantine
        monitor.poll_once().await;
        assert!(monitor.is_quarantined(&id).await);

        assert!(monitor.release_quarantine(&id).await);
        assert_eq!(monitor.healthy_pool().await.len(), 2);
    }

    #[tokio::test]
    async fn test_ranked_prefers_healthy() {
        let a = node("a");
        let b = node("b");
        let monitor = monitor_with(&[a.clone(), b]).await;
        a.set_degraded(true);
        monitor.poll_once().await;

        let ranked = monitor
            .ranked(&[NodeId::new("a"), NodeId::new("b")])
            .await;
        assert_eq!(ranked[0].id(), &NodeId::new("b"));
    }

    #[tokio::test]
    async fn test_capacity_advice() {
        let nodes: Vec<_> = (0..4).map(|i| node(&format!("n{}", i))).collect();
        let monitor = monitor_with(&nodes).await;

        let advice = monitor.capacity_advice(5).await;
        assert_eq!(advice.action, ScalingAction::ScaleUp(2));

        let advice = monitor.capacity_advice(3).await;
        assert_eq!(advice.action, ScalingAction::Hold);

        let advice = monitor.capacity_advice(1).await;
        assert_eq!(advice.action, ScalingAction::Hold);
        assert_eq!(advice.required, 2);
    }

    #[tokio::test]
    async fn test_report_sorted() {
        let monitor = monitor_with(&[node("c"), node("a"), node("b")]).await;
        let ids: Vec<String> = monitor
            .report()
            .await
            .into_iter()
            .map(|r| r.node_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let monitor = Arc::new(monitor_with(&[node("a")]).await);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(rx).await }
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

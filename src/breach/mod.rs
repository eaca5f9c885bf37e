//! Breach Detector
//!
//! Watches fragment access for patterns that look like an attacker harvesting
//! fragments, and escalates per (record, node) pair:
//!
//! ```text
//! Normal ──anomaly──► Suspicious ──anomaly──► Locked ──operator_unlock──► Normal
//! ```
//!
//! ## Anomalies
//!
//! - More than `max_fetches_per_window` fetches of one pair within `window`
//! - One requester touching more than `max_distinct_records` records within
//!   `window` (every pair in the offending request escalates)
//!
//! ## Locked
//!
//! Locking a pair yields a `BreachResponse`: quarantine the node and rotate
//! the record. Nothing unlocks a pair except `operator_unlock`.
//!
//! Normal pairs and requesters with nothing left in their windows are evicted
//! at most once per window; pairs of deleted records go through
//! `forget_record`.
//!
//! The detector also owns the alert channel that operational failures
//! (`RedundancyLost`, partial deletions, rolled-back distributions) are
//! published on.

pub mod alerts;

pub use alerts::{Alert, AlertEvent};

use crate::types::{now_secs, NodeId, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Alert channel capacity; slow subscribers miss the oldest alerts
const ALERT_CAPACITY: usize = 256;

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreachPolicy {
    pub window: Duration,
    pub max_fetches_per_window: usize,
    pub max_distinct_records: usize,
    pub max_unauthorized_per_window: usize,
}

impl Default for BreachPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_fetches_per_window: 20,
            max_distinct_records: 3,
            max_unauthorized_per_window: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairState {
    Normal,
    Suspicious,
    Locked,
}

/// Why a pair escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anomaly {
    FetchRate { fetches: usize },
    RecordSpread { requester: String, distinct: usize },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::FetchRate { fetches } => write!(f, "{} fetches in window", fetches),
            Anomaly::RecordSpread {
                requester,
                distinct,
            } => write!(f, "{} touched {} records in window", requester, distinct),
        }
    }
}

/// Action the service must take for a newly locked pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreachResponse {
    pub quarantine: NodeId,
    pub rotate: Vec<RecordId>,
    pub reason: Anomaly,
}

#[derive(Debug)]
struct PairTracker {
    state: PairState,
    fetches: VecDeque<Instant>,
}

impl PairTracker {
    fn new() -> Self {
        Self {
            state: PairState::Normal,
            fetches: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct RequesterTracker {
    requests: VecDeque<(Instant, RecordId)>,
    unauthorized: VecDeque<Instant>,
}

#[derive(Debug)]
struct DetectorState {
    pairs: HashMap<(RecordId, NodeId), PairTracker>,
    requesters: HashMap<String, RequesterTracker>,
    last_sweep: Instant,
}

impl DetectorState {
    fn new() -> Self {
        Self {
            pairs: HashMap::new(),
            requesters: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    /// Drop idle entries once a full window has passed since the last sweep.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_sweep) <= window {
            return;
        }
        self.last_sweep = now;

        let (pairs, requesters) = (self.pairs.len(), self.requesters.len());
        self.pairs.retain(|_, pair| {
            prune(&mut pair.fetches, now, window, |at| *at);
            pair.state != PairState::Normal || !pair.fetches.is_empty()
        });
        self.requesters.retain(|_, tracker| {
            prune(&mut tracker.requests, now, window, |(at, _)| *at);
            prune(&mut tracker.unauthorized, now, window, |at| *at);
            !tracker.requests.is_empty() || !tracker.unauthorized.is_empty()
        });
        debug!(
            pairs_evicted = pairs - self.pairs.len(),
            requesters_evicted = requesters - self.requesters.len(),
            "Swept idle detector state"
        );
    }
}

fn prune<T>(queue: &mut VecDeque<T>, now: Instant, window: Duration, at: impl Fn(&T) -> Instant) {
    while let Some(front) = queue.front() {
        if now.duration_since(at(front)) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

pub struct BreachDetector {
    policy: BreachPolicy,
    state: Mutex<DetectorState>,
    alerts: broadcast::Sender<Alert>,
}

impl BreachDetector {
    pub fn new(policy: BreachPolicy) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CAPACITY);
        Self {
            policy,
            state: Mutex::new(DetectorState::new()),
            alerts,
        }
    }

    pub fn policy(&self) -> &BreachPolicy {
        &self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Publish an alert. Having no subscribers is not an error.
    pub fn emit(&self, event: AlertEvent) {
        warn!(alert = %event, "Alert raised");
        let _ = self.alerts.send(Alert {
            at: now_secs(),
            event,
        });
    }

    /// Record a retrieval by `requester` that fetched `record_id` from `nodes`.
    ///
    /// Returns a response for every pair this call moved into `Locked`.
    pub async fn record_fetch(
        &self,
        requester: &str,
        record_id: &RecordId,
        nodes: &[NodeId],
    ) -> Vec<BreachResponse> {
        let now = Instant::now();
        let window = self.policy.window;
        let mut state = self.state.lock().await;
        state.sweep(now, window);

        let spread = {
            let tracker = state.requesters.entry(requester.to_string()).or_default();
            tracker.requests.push_back((now, record_id.clone()));
            prune(&mut tracker.requests, now, window, |(at, _)| *at);
            let distinct: HashSet<&RecordId> = tracker.requests.iter().map(|(_, r)| r).collect();
            (distinct.len() > self.policy.max_distinct_records).then(|| Anomaly::RecordSpread {
                requester: requester.to_string(),
                distinct: distinct.len(),
            })
        };

        let mut responses = Vec::new();
        for node_id in nodes {
            let pair = state
                .pairs
                .entry((record_id.clone(), node_id.clone()))
                .or_insert_with(PairTracker::new);
            pair.fetches.push_back(now);
            prune(&mut pair.fetches, now, window, |at| *at);

            let anomaly = if pair.fetches.len() > self.policy.max_fetches_per_window {
                Some(Anomaly::FetchRate {
                    fetches: pair.fetches.len(),
                })
            } else {
                spread.clone()
            };

            let Some(anomaly) = anomaly else {
                continue;
            };

            match pair.state {
                PairState::Normal => {
                    pair.state = PairState::Suspicious;
                    self.emit(AlertEvent::Suspicious {
                        record_id: record_id.clone(),
                        node_id: node_id.clone(),
                        reason: anomaly.to_string(),
                    });
                }
                PairState::Suspicious => {
                    pair.state = PairState::Locked;
                    self.emit(AlertEvent::BreachLocked {
                        record_id: record_id.clone(),
                        node_id: node_id.clone(),
                        reason: anomaly.to_string(),
                    });
                    responses.push(BreachResponse {
                        quarantine: node_id.clone(),
                        rotate: vec![record_id.clone()],
                        reason: anomaly,
                    });
                }
                PairState::Locked => {}
            }
        }
        responses
    }

    /// Record a refused request. Bursts raise an alert; the requester is
    /// refused by policy already, so no pair escalates.
    pub async fn record_unauthorized(&self, requester: &str, record_id: &RecordId) {
        let now = Instant::now();
        let attempts = {
            let mut state = self.state.lock().await;
            state.sweep(now, self.policy.window);
            let tracker = state.requesters.entry(requester.to_string()).or_default();
            tracker.unauthorized.push_back(now);
            prune(&mut tracker.unauthorized, now, self.policy.window, |at| *at);
            tracker.unauthorized.len()
        };

        warn!(requester, record_id = %record_id, attempts, "Unauthorized access attempt");
        if attempts > self.policy.max_unauthorized_per_window {
            self.emit(AlertEvent::UnauthorizedBurst {
                requester: requester.to_string(),
                attempts,
            });
        }
    }

    pub async fn pair_state(&self, record_id: &RecordId, node_id: &NodeId) -> PairState {
        let state = self.state.lock().await;
        state
            .pairs
            .get(&(record_id.clone(), node_id.clone()))
            .map(|pair| pair.state)
            .unwrap_or(PairState::Normal)
    }

    pub async fn is_locked(&self, record_id: &RecordId, node_id: &NodeId) -> bool {
        self.pair_state(record_id, node_id).await == PairState::Locked
    }

    /// Every locked pair.
    pub async fn locked_pairs(&self) -> Vec<(RecordId, NodeId)> {
        let state = self.state.lock().await;
        let mut locked: Vec<(RecordId, NodeId)> = state
            .pairs
            .iter()
            .filter(|(_, pair)| pair.state == PairState::Locked)
            .map(|(key, _)| key.clone())
            .collect();
        locked.sort();
        locked
    }

    /// Drop every pair of a deleted record, locked ones included.
    pub async fn forget_record(&self, record_id: &RecordId) {
        let mut state = self.state.lock().await;
        state.pairs.retain(|(record, _), _| record != record_id);
    }

    /// Return a pair to `Normal` and forget its history. Operator action only.
    pub async fn operator_unlock(&self, record_id: &RecordId, node_id: &NodeId) -> bool {
        let mut state = self.state.lock().await;
        match state.pairs.get_mut(&(record_id.clone(), node_id.clone())) {
            Some(pair) if pair.state != PairState::Normal => {
                pair.state = PairState::Normal;
                pair.fetches.clear();
                info!(record_id = %record_id, node_id = %node_id, "Pair unlocked by operator");
                true
            }
            _ => false,
        }
    }
}

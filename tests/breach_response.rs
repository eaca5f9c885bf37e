//! Integration tests for breach containment and secure deletion.
//!
//! Covered:
//! - A locked (record, node) pair quarantines the node and rotates the record
//! - Locking every holder leaves the record frozen until an operator unlocks
//! - Unauthorized bursts raise alerts and never reach fragments
//! - Deletion with unreachable holders: pending tombstone, retry, receipt

use mirrorshard::breach::{Alert, AlertEvent, BreachPolicy, PairState};
use mirrorshard::crypto::{generate_mnemonic, ServiceKeyring};
use mirrorshard::manifest::{
    AccessPolicy, ManifestState, ManifestStore, MemoryManifestStore, ReplicatedManifestStore,
};
use mirrorshard::node::{MemoryNode, MirrorNode, NodeDescriptor};
use mirrorshard::{
    ErrorClass, GuardSettings, MirrorGuard, NodeId, ProtectOptions, ProtectionError, RecordId,
    RequesterAuth,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// === Test Fixtures ===

async fn setup(
    node_count: usize,
    breach: BreachPolicy,
) -> (MirrorGuard, Vec<Arc<MemoryNode>>) {
    let settings = GuardSettings {
        node_timeout: Duration::from_millis(200),
        retrieve_deadline: Duration::from_secs(2),
        rebalance_grace: Duration::ZERO,
        breach,
        ..GuardSettings::default()
    };
    let keyring = ServiceKeyring::from_mnemonic(&generate_mnemonic().unwrap()).unwrap();
    let replicas: Vec<Arc<dyn ManifestStore>> = (0..3)
        .map(|i| Arc::new(MemoryManifestStore::new(format!("replica-{}", i))) as Arc<dyn ManifestStore>)
        .collect();
    let guard = MirrorGuard::new(
        settings,
        keyring,
        ReplicatedManifestStore::new(replicas).unwrap(),
    );

    let mut nodes = Vec::new();
    for i in 0..node_count {
        let node = Arc::new(MemoryNode::new(NodeDescriptor::new(
            format!("node-{}", i),
            ["eu", "us", "ap"][i % 3],
            format!("op-{}", i),
            100,
        )));
        guard.register_node(node.clone() as Arc<dyn MirrorNode>).await;
        nodes.push(node);
    }
    (guard, nodes)
}

fn policy(max_fetches: usize) -> BreachPolicy {
    BreachPolicy {
        window: Duration::from_secs(60),
        max_fetches_per_window: max_fetches,
        max_distinct_records: 3,
        max_unauthorized_per_window: 3,
    }
}

async fn protect(guard: &MirrorGuard, record: &RecordId, payload: &[u8]) {
    guard
        .protect(
            record,
            payload,
            ProtectOptions::new(AccessPolicy::owner("alice")).threshold(5, 3),
        )
        .await
        .unwrap();
}

fn drain(alerts: &mut broadcast::Receiver<Alert>) -> Vec<AlertEvent> {
    let mut events = Vec::new();
    while let Ok(alert) = alerts.try_recv() {
        events.push(alert.event);
    }
    events
}

fn alice() -> RequesterAuth {
    RequesterAuth::new("alice")
}

// === Breach response ===

#[tokio::test]
async fn test_locked_pair_quarantines_and_rotates() {
    let (guard, nodes) = setup(6, policy(2)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;

    let before = guard.manifest(&record).await.unwrap();
    let target = before.holder_ids()[0].clone();

    // A node-side access log shows one requester hammering one holder
    for _ in 0..4 {
        guard
            .report_fetches("scraper", &record, std::slice::from_ref(&target))
            .await;
    }

    assert_eq!(
        guard.breach().pair_state(&record, &target).await,
        PairState::Locked
    );
    assert!(guard.health().is_quarantined(&target).await);

    let after = guard.manifest(&record).await.unwrap();
    assert_eq!(after.rotation_epoch, before.rotation_epoch + 1);
    assert!(!after.holders.contains_key(&target));
    for node in &nodes {
        assert!(!node.holds_epoch(&record, 0).await);
    }

    let events = drain(&mut alerts);
    assert!(events
        .iter()
        .any(|e| matches!(e, AlertEvent::Suspicious { node_id, .. } if *node_id == target)));
    assert!(events
        .iter()
        .any(|e| matches!(e, AlertEvent::BreachLocked { node_id, .. } if *node_id == target)));
    assert!(events
        .iter()
        .any(|e| matches!(e, AlertEvent::NodeQuarantined { node_id } if *node_id == target)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, AlertEvent::RotationFailed { .. })));

    // The legitimate owner is unaffected
    assert_eq!(guard.retrieve(&record, &alice()).await.unwrap(), b"abc123");
}

#[tokio::test]
async fn test_fully_locked_record_waits_for_operator() {
    let (guard, _nodes) = setup(5, policy(1)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;
    let holders = guard.manifest(&record).await.unwrap().holder_ids();

    // Each retrieval touches every holder: normal, suspicious, locked
    for _ in 0..3 {
        assert_eq!(guard.retrieve(&record, &alice()).await.unwrap(), b"abc123");
    }
    assert_eq!(guard.breach().locked_pairs().await.len(), holders.len());

    let events = drain(&mut alerts);
    assert!(events
        .iter()
        .any(|e| matches!(e, AlertEvent::RedundancyLost { valid: 0, needed: 3, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, AlertEvent::RotationFailed { .. })));

    // Never a partial result
    let err = guard.retrieve(&record, &alice()).await.unwrap_err();
    assert!(matches!(err, ProtectionError::ReconstructionImpossible { .. }));
    assert_eq!(err.class(), ErrorClass::HardFailure);

    for node_id in &holders {
        assert!(guard.operator_unlock(&record, node_id).await);
        assert!(guard.release_quarantine(node_id).await);
    }
    assert!(guard.breach().locked_pairs().await.is_empty());
    assert_eq!(guard.retrieve(&record, &alice()).await.unwrap(), b"abc123");
}

#[tokio::test]
async fn test_record_spread_locks_pairs() {
    let (guard, _nodes) = setup(6, policy(100)).await;
    let records: Vec<RecordId> = (0..5).map(|i| RecordId::new(format!("r{}", i))).collect();
    for record in &records {
        protect(&guard, record, b"payload").await;
    }

    let node = NodeId::new("node-0");
    for record in &records {
        guard
            .report_fetches("crawler", record, std::slice::from_ref(&node))
            .await;
    }

    // Past three distinct records every touched pair turns suspicious; a
    // second fetch while still spread locks it
    guard
        .report_fetches("crawler", &records[4], std::slice::from_ref(&node))
        .await;

    assert_eq!(
        guard.breach().pair_state(&records[3], &node).await,
        PairState::Suspicious
    );
    assert_eq!(
        guard.breach().pair_state(&records[4], &node).await,
        PairState::Locked
    );
    assert!(guard.health().is_quarantined(&node).await);
    assert!(!guard
        .manifest(&records[4])
        .await
        .unwrap()
        .holders
        .contains_key(&node));
}

#[tokio::test]
async fn test_unauthorized_burst_alerts() {
    let (guard, nodes) = setup(5, policy(20)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;

    let mallory = RequesterAuth::new("mallory");
    for _ in 0..4 {
        let err = guard.retrieve(&record, &mallory).await.unwrap_err();
        assert!(matches!(err, ProtectionError::Unauthorized { .. }));
        assert_eq!(err.class(), ErrorClass::Policy);
    }

    let events = drain(&mut alerts);
    assert!(events.iter().any(|e| matches!(
        e,
        AlertEvent::UnauthorizedBurst { requester, attempts: 4 } if requester == "mallory"
    )));

    // Refused requests never reach a node
    assert!(guard.breach().locked_pairs().await.is_empty());
    for node in &nodes {
        assert!(!guard.health().is_quarantined(node.id()).await);
    }
}

#[tokio::test]
async fn test_unknown_record_is_refused() {
    let (guard, _nodes) = setup(5, policy(20)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;

    // An outsider cannot tell a missing record from a protected one
    let mallory = RequesterAuth::new("mallory");
    for id in ["r1", "missing", "r2", "r3"] {
        let err = guard.retrieve(&RecordId::new(id), &mallory).await.unwrap_err();
        assert!(
            matches!(err, ProtectionError::Unauthorized { ref record_id, .. } if record_id.as_str() == id),
            "{} answered {:?}",
            id,
            err
        );
    }
    assert!(drain(&mut alerts)
        .iter()
        .any(|e| matches!(e, AlertEvent::UnauthorizedBurst { attempts: 4, .. })));

    assert!(matches!(
        guard.retrieve(&RecordId::new("missing"), &alice()).await,
        Err(ProtectionError::Unauthorized { .. })
    ));
}

// === Deletion ===

#[tokio::test]
async fn test_partial_deletion_then_retry() {
    let (guard, nodes) = setup(5, policy(20)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;

    for node in &nodes[..3] {
        node.set_offline(true);
    }
    let unreached = match guard.delete(&record, &alice()).await {
        Err(ProtectionError::PartialDeletion { unreached, .. }) => unreached,
        other => panic!("expected partial deletion, got {:?}", other),
    };
    assert_eq!(unreached.len(), 3);

    let pending = guard.manifest(&record).await.unwrap();
    assert_eq!(pending.state, ManifestState::PendingDeletion);
    assert_eq!(pending.holders.len(), 3);
    assert!(pending.sealed_openings.is_none());
    assert!(matches!(
        guard.retrieve(&record, &alice()).await,
        Err(ProtectionError::NotFound(_))
    ));
    assert!(matches!(
        guard.retrieve(&record, &RequesterAuth::new("mallory")).await,
        Err(ProtectionError::Unauthorized { .. })
    ));
    for node in &nodes[3..] {
        assert!(!node.holds(&record).await);
    }
    assert!(matches!(
        drain(&mut alerts).last(),
        Some(AlertEvent::PartialDeletion { .. })
    ));

    for node in &nodes {
        node.set_offline(false);
    }
    let receipt = guard.delete(&record, &alice()).await.unwrap();
    assert!(receipt.confirmed);
    assert_eq!(receipt.erased.len(), 3);
    assert!(receipt.unreached.is_empty());

    for node in &nodes {
        assert_eq!(node.fragment_count().await, 0);
    }
    assert!(matches!(
        guard.manifest(&record).await,
        Err(ProtectionError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_deletion_below_threshold_completes() {
    let (guard, nodes) = setup(5, policy(20)).await;
    let mut alerts = guard.subscribe_alerts();
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;

    nodes[0].set_offline(true);
    nodes[4].set_offline(true);
    let receipt = guard.delete(&record, &alice()).await.unwrap();
    assert!(receipt.confirmed);
    assert_eq!(receipt.erased.len(), 3);
    assert_eq!(
        receipt.unreached,
        vec![nodes[0].id().clone(), nodes[4].id().clone()]
    );

    // The stragglers' fragments are orphans: their keys went with the manifest
    assert!(nodes[0].holds(&record).await);
    assert!(matches!(
        guard.manifest(&record).await,
        Err(ProtectionError::NotFound(_))
    ));
    assert!(matches!(
        drain(&mut alerts).last(),
        Some(AlertEvent::PartialDeletion { unreached, .. }) if unreached.len() == 2
    ));
}

#[tokio::test]
async fn test_delete_requires_deleter() {
    let (guard, nodes) = setup(5, policy(20)).await;
    let record = RecordId::new("r1");
    guard
        .protect(
            &record,
            b"abc123",
            ProtectOptions::new(AccessPolicy::owner("alice").with_reader("bob")).threshold(5, 3),
        )
        .await
        .unwrap();

    // Readers may read but not delete
    assert_eq!(
        guard
            .retrieve(&record, &RequesterAuth::new("bob"))
            .await
            .unwrap(),
        b"abc123"
    );
    assert!(matches!(
        guard.delete(&record, &RequesterAuth::new("bob")).await,
        Err(ProtectionError::Unauthorized { .. })
    ));
    for node in &nodes {
        assert!(node.holds(&record).await);
    }

    assert!(matches!(
        guard.delete(&RecordId::new("missing"), &alice()).await,
        Err(ProtectionError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_forgets_breach_state() {
    let (guard, _nodes) = setup(5, policy(1)).await;
    let record = RecordId::new("r1");
    protect(&guard, &record, b"abc123").await;
    let holders = guard.manifest(&record).await.unwrap().holder_ids();

    for _ in 0..2 {
        guard.retrieve(&record, &alice()).await.unwrap();
    }
    for node_id in &holders {
        assert_eq!(
            guard.breach().pair_state(&record, node_id).await,
            PairState::Suspicious
        );
    }

    guard.delete(&record, &alice()).await.unwrap();

    // A record later protected under the same id starts from a clean slate
    for node_id in &holders {
        assert_eq!(
            guard.breach().pair_state(&record, node_id).await,
            PairState::Normal
        );
    }
}

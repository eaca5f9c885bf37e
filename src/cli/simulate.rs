use super::mnemonic::{read_mnemonic, MnemonicSource};
use mirrorshard::config::MirrorConfig;
use mirrorshard::crypto::{generate_mnemonic, ServiceKeyring};
use mirrorshard::manifest::{
    AccessPolicy, ManifestStore, MemoryManifestStore, ReplicatedManifestStore,
};
use mirrorshard::node::{MemoryNode, MirrorNode, NodeDescriptor};
use mirrorshard::{MirrorGuard, ProtectOptions, RecordId, RequesterAuth};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const REGIONS: [&str; 4] = ["eu-west", "us-east", "ap-south", "sa-east"];

/// Parameters of one simulation run
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub nodes: usize,
    pub regions: usize,
    pub records: usize,
    pub fail: usize,
    pub n: Option<usize>,
    pub k: Option<usize>,
}

/// Run an in-memory cluster through protect, node failure and rebalance
///
/// Every node and manifest replica lives in this process. The run protects
/// `records` records, takes `fail` nodes offline, lets the health monitor
/// notice, sweeps for rebalances and checks that every record still
/// rebuilds. The final node health report is printed as JSON.
pub async fn execute(
    config_path: Option<String>,
    mnemonic_file: Option<String>,
    plan: SimulationPlan,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => MirrorConfig::load(Path::new(&path))?,
        None => MirrorConfig::default(),
    };

    let mnemonic = match mnemonic_file {
        Some(file) => read_mnemonic(MnemonicSource::File(file))?,
        None => generate_mnemonic()?,
    };
    let keyring = ServiceKeyring::from_mnemonic(&mnemonic)?;

    let mut settings = config.guard_settings()?;
    // Lost holders are rebalanced on the first sweep
    settings.rebalance_grace = Duration::ZERO;
    let failure_threshold = settings.health.failure_threshold;

    let replicas: Vec<Arc<dyn ManifestStore>> = (0..config.manifest.replicas)
        .map(|i| Arc::new(MemoryManifestStore::new(format!("replica-{}", i))) as Arc<dyn ManifestStore>)
        .collect();
    let guard = MirrorGuard::new(settings, keyring, ReplicatedManifestStore::new(replicas)?);

    let regions = plan.regions.clamp(1, REGIONS.len());
    let mut nodes = Vec::with_capacity(plan.nodes);
    for i in 0..plan.nodes {
        let node = Arc::new(MemoryNode::new(NodeDescriptor::new(
            format!("node-{:02}", i),
            REGIONS[i % regions],
            format!("operator-{}", i % (regions + 1)),
            1024,
        )));
        guard.register_node(node.clone() as Arc<dyn MirrorNode>).await;
        nodes.push(node);
    }
    println!("Cluster: {} nodes across {} regions", plan.nodes, regions);

    let mut options = ProtectOptions::default();
    if let (Some(n), Some(k)) = (plan.n, plan.k) {
        options = options.threshold(n, k);
    }

    let mut records = Vec::with_capacity(plan.records);
    for i in 0..plan.records {
        let record_id = RecordId::new(format!("record-{}", i));
        let owner = format!("owner-{}", i);
        let payload = format!("simulated payload #{}", i).into_bytes();

        let reference = guard
            .protect(
                &record_id,
                &payload,
                ProtectOptions {
                    policy: AccessPolicy::owner(&owner),
                    ..options.clone()
                },
            )
            .await?;
        let commitment = guard.commitment(&record_id).await?;
        println!(
            "Protected {} (version {}, commitment {})",
            reference.record_id, reference.version, commitment.record
        );
        records.push((record_id, RequesterAuth::new(owner), payload));
    }

    for (record_id, _, _) in &records {
        let proof = guard.verify_existence(record_id).await?;
        if !guard.verify(&proof).await? {
            return Err(format!("Existence proof for {} did not verify", record_id).into());
        }
    }
    println!("Existence proofs verified for {} records", records.len());

    for node in nodes.iter().take(plan.fail) {
        node.set_offline(true);
        println!("Took {} offline", node.id());
    }
    for _ in 0..failure_threshold {
        guard.health().poll_once().await;
    }

    let sweep = guard.sweep_rebalance().await?;
    println!(
        "Rebalance sweep: {} checked, {} rebalanced, {} failed",
        sweep.checked,
        sweep.rebalanced.len(),
        sweep.failed.len()
    );
    for (record_id, reason) in &sweep.failed {
        println!("  {}: {}", record_id, reason);
    }

    let mut intact = 0;
    for (record_id, auth, payload) in &records {
        match guard.retrieve(record_id, auth).await {
            Ok(rebuilt) if rebuilt == *payload => intact += 1,
            Ok(_) => println!("  {}: rebuilt value differs", record_id),
            Err(e) => println!("  {}: {}", record_id, e),
        }
    }
    println!("{} of {} records rebuild intact", intact, records.len());
    println!();
    println!("{}", serde_json::to_string_pretty(&guard.node_health_report().await)?);

    if intact == records.len() {
        Ok(())
    } else {
        Err("Simulation lost records".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulation_survives_one_failure() {
        let plan = SimulationPlan {
            nodes: 8,
            regions: 3,
            records: 3,
            fail: 1,
            n: Some(5),
            k: Some(3),
        };
        execute(None, None, plan).await.unwrap();
    }

    #[tokio::test]
    async fn test_simulation_rejects_small_cluster() {
        let plan = SimulationPlan {
            nodes: 3,
            regions: 1,
            records: 1,
            fail: 0,
            n: Some(5),
            k: Some(3),
        };
        let err = execute(None, None, plan).await.unwrap_err();
        assert!(err.to_string().contains("Insufficient capacity"));
    }
}

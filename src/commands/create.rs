//! `create`: bootstrap a cluster from not-yet-clustered nodes.
//!
//! Validates the node list, meets everyone through the first node, assigns
//! contiguous slot ranges to the primaries, wires replicas round-robin, and
//! verifies state and coverage. Any mutation failure rolls the nodes back to
//! a blank state.

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use crate::client::address::{is_valid_hostname, parse_address};
use crate::client::pool::ConnectionPool;
use crate::client::types::ClusterState;
use crate::error::{AdminError, Result};
use crate::settings::Settings;
use crate::slots::distribution::{partition_keyspace, SLOT_COUNT};

pub async fn run(settings: &Settings, nodes: &[String], replicas: u32) -> Result<()> {
    settings.require_password()?;
    validate_input(nodes, replicas)?;

    let pool = ConnectionPool::new(settings.clone());
    let result = create(&pool, nodes, replicas).await;
    pool.close_all().await;
    result
}

/// Compute the cluster layout: how many primaries, and which replica
/// follows which primary (round-robin).
pub fn layout(nodes: &[String], replicas: u32) -> (Vec<String>, Vec<(String, String)>) {
    let primary_count = (nodes.len() / (replicas as usize + 1)).max(3);
    let primaries: Vec<String> = nodes[..primary_count.min(nodes.len())].to_vec();
    let assignments: Vec<(String, String)> = nodes[primaries.len()..]
        .iter()
        .enumerate()
        .map(|(i, replica)| (replica.clone(), primaries[i % primaries.len()].clone()))
        .collect();
    (primaries, assignments)
}

fn validate_input(nodes: &[String], replicas: u32) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes {
        let (host, port) = parse_address(node)?;
        if !is_valid_hostname(&host) {
            return Err(AdminError::Input(format!(
                "malformed host '{}' in address {}",
                host, node
            )));
        }
        if !seen.insert(format!("{}:{}", host, port)) {
            return Err(AdminError::Input(format!("duplicate node address: {}", node)));
        }
    }

    let required = 3 * (replicas as usize + 1);
    if nodes.len() < required {
        return Err(AdminError::Preflight(format!(
            "at least {} nodes are required for {} replica(s) per primary, got {}",
            required,
            replicas,
            nodes.len()
        )));
    }
    Ok(())
}

async fn create(pool: &ConnectionPool, nodes: &[String], replicas: u32) -> Result<()> {
    println!(
        "creating a cluster from {} nodes ({} replica(s) per primary)",
        nodes.len(),
        replicas
    );

    // Step 1: every node must be reachable and not yet clustered. Checks
    // run in parallel; results are reported in input order.
    println!("step 1: checking nodes");
    let checks = join_all(nodes.iter().enumerate().map(|(index, address)| async move {
        let outcome = preflight_node(pool, address).await;
        (index, outcome)
    }))
    .await;

    let mut ordered: Vec<(usize, std::result::Result<(), String>)> = checks;
    ordered.sort_by_key(|(index, _)| *index);

    let mut first_failure: Option<String> = None;
    for (index, outcome) in &ordered {
        match outcome {
            Ok(()) => println!("  [{}/{}] {} ok", index + 1, nodes.len(), nodes[*index]),
            Err(reason) => {
                println!("  [{}/{}] {} FAILED: {}", index + 1, nodes.len(), nodes[*index], reason);
                if first_failure.is_none() {
                    first_failure = Some(reason.clone());
                }
            }
        }
    }
    if let Some(reason) = first_failure {
        return Err(AdminError::Preflight(reason));
    }

    // Step 2: layout.
    let (primaries, assignments) = layout(nodes, replicas);
    println!("step 2: layout");
    println!("  primaries: {}", primaries.len());
    println!("  replicas: {}", assignments.len());

    // Step 3: meet fan-out, sequential, through the first node.
    println!("step 3: meeting nodes");
    let first = pool.connect(&nodes[0]).await?;
    for (index, node) in nodes[1..].iter().enumerate() {
        let (host, port) = parse_address(node)?;
        first.cluster_meet(&host, port).await.map_err(|e| {
            AdminError::Topology(format!("CLUSTER MEET for {} failed: {}", node, e))
        })?;
        println!("  [{}/{}] met {}", index + 1, nodes.len() - 1, node);
    }

    // Step 4: contiguous slot assignment, remainder to the earlier
    // primaries. An assignment failure rolls everything back.
    println!("step 4: assigning slots");
    let distribution = partition_keyspace(primaries.len() as u16);
    let mut assigned: Vec<String> = Vec::new();
    for (index, primary) in primaries.iter().enumerate() {
        let range = &distribution[index];
        println!("  {}: slots {} ({})", primary, range, range.width());

        let outcome = match pool.connect(primary).await {
            Ok(client) => client
                .cluster_add_slots(range.iter().collect())
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = outcome {
            println!("  slot assignment failed on {}", primary);
            rollback_assigned(pool, &assigned).await;
            rollback_all(pool, nodes).await;
            return Err(AdminError::Topology(format!(
                "ADDSLOTS on {} failed: {}",
                primary, reason
            )));
        }
        assigned.push(primary.clone());
    }

    // Step 5: replica wiring after the cluster settles.
    if !assignments.is_empty() {
        println!("step 5: configuring replicas");
        println!("  waiting for the cluster to stabilize");
        if first.wait_for_state_ok(Duration::from_secs(10)).await.is_err() {
            println!("  stabilization timed out; proceeding after a fixed delay");
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        for (replica, primary) in &assignments {
            let outcome: Result<()> = async {
                let primary_client = pool.connect(primary).await?;
                let primary_id = primary_client.cluster_myid().await?;
                let replica_client = pool.connect(replica).await?;
                replica_client.cluster_replicate(&primary_id).await?;
                Ok(())
            }
            .await;

            if let Err(err) = outcome {
                println!("  replica setup failed for {}", replica);
                rollback_all(pool, nodes).await;
                return Err(AdminError::Topology(format!(
                    "REPLICATE {} -> {} failed: {}",
                    replica, primary, err
                )));
            }
            println!("  {} replicates {}", replica, primary);
        }
    }

    // Step 6: verification.
    println!("step 6: verifying the cluster");
    if first.wait_for_state_ok(Duration::from_secs(15)).await.is_err() {
        println!("  stabilization timed out; proceeding after a fixed delay");
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    let info = first.cluster_info().await?;
    if info.state != ClusterState::Ok {
        return Err(AdminError::Convergence(format!(
            "cluster state is '{}' after bootstrap",
            info.state
        )));
    }
    let covered = first.covered_slot_total().await?;
    if covered != u32::from(SLOT_COUNT) {
        return Err(AdminError::Convergence(format!(
            "slot coverage incomplete after bootstrap: {}/{}",
            covered, SLOT_COUNT
        )));
    }

    println!();
    println!("cluster created");
    println!("  nodes: {}", nodes.len());
    println!("  primaries: {}", primaries.len());
    println!("  replicas: {}", assignments.len());
    println!("  state: {}", info.state);
    for line in resilience_notes(primaries.len(), assignments.len(), replicas) {
        println!("  {}", line);
    }

    Ok(())
}

async fn preflight_node(pool: &ConnectionPool, address: &str) -> std::result::Result<(), String> {
    let client = pool.connect(address).await.map_err(|e| e.to_string())?;
    let info = client.cluster_info().await.map_err(|e| e.to_string())?;
    // A blank node reports cluster_state:fail; anything else means it
    // already belongs to a cluster.
    if info.state != ClusterState::Fail {
        return Err(format!("{} is already part of a cluster", address));
    }
    Ok(())
}

/// Undo partial slot assignment: soft reset first, hard reset as fallback.
async fn rollback_assigned(pool: &ConnectionPool, assigned: &[String]) {
    if assigned.is_empty() {
        return;
    }
    println!("  rolling back partially assigned primaries");
    for address in assigned {
        let Ok(client) = pool.connect(address).await else {
            continue;
        };
        if client.cluster_reset(false).await.is_err() {
            if let Err(err) = client.cluster_reset(true).await {
                warn!(address = %address, error = %err, "rollback reset failed");
            }
        }
    }
}

/// Reset every node to a blank state. Best effort.
async fn rollback_all(pool: &ConnectionPool, nodes: &[String]) {
    println!("bootstrap failed; resetting all nodes");
    for (index, address) in nodes.iter().enumerate() {
        let outcome = match pool.connect(address).await {
            Ok(client) => client.cluster_reset(true).await.map_err(|e| e.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match outcome {
            Ok(()) => println!("  [{}/{}] {} reset", index + 1, nodes.len(), address),
            Err(reason) => {
                println!("  [{}/{}] {} reset failed: {}", index + 1, nodes.len(), address, reason);
            }
        }
    }
}

/// Fault-tolerance notes appended to the success summary.
fn resilience_notes(primary_count: usize, replica_count: usize, replicas: u32) -> Vec<String> {
    let mut notes = Vec::new();
    if replica_count == 0 {
        notes.push("no replicas: losing any primary loses its shard's data".to_string());
        notes.push("consider --replicas 1 or higher for fault tolerance".to_string());
    } else {
        notes.push(format!(
            "each primary has {} replica(s); each shard tolerates {} concurrent failure(s)",
            replicas, replicas
        ));
    }
    if primary_count + replica_count < 6 {
        notes.push("fewer than 6 nodes total; production clusters usually run 6 or more".to_string());
    }
    notes
}

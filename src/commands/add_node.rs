//! `add-node`: join a new node to an existing cluster, optionally as a
//! replica of a named primary.

use std::time::Duration;

use tracing::warn;

use crate::client::address::{normalize_address, parse_address};
use crate::client::cluster_ops::wait_for_convergence;
use crate::client::node_client::{NodeClient, ValkeyError};
use crate::client::pool::ConnectionPool;
use crate::client::types::ClusterState;
use crate::error::{AdminError, Result};
use crate::report::short_id;
use crate::settings::Settings;

/// Budget for the whole-cluster view convergence wait before REPLICATE.
const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Replication retry schedule: the primary may not be known to the new node
/// yet right after MEET.
const REPLICATE_ATTEMPTS: u32 = 5;
const REPLICATE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Visibility verification schedule.
const VISIBILITY_ATTEMPTS: u32 = 5;
const VISIBILITY_RETRY_DELAY: Duration = Duration::from_secs(2);

pub async fn run(
    settings: &Settings,
    new_node: &str,
    existing_node: &str,
    master_id: Option<&str>,
) -> Result<()> {
    settings.require_password()?;

    let pool = ConnectionPool::new(settings.clone());
    let result = add_node(&pool, new_node, existing_node, master_id).await;
    pool.close_all().await;
    result
}

async fn add_node(
    pool: &ConnectionPool,
    new_node: &str,
    existing_node: &str,
    master_id: Option<&str>,
) -> Result<()> {
    println!("adding {} to the cluster at {}", new_node, existing_node);
    match master_id {
        Some(id) => println!("  as a replica of {}", short_id(id)),
        None => println!("  as a primary (no slots until a reshard)"),
    }

    println!("step 1: validating the existing cluster");
    let entry = pool.connect(existing_node).await?;
    let info = entry.cluster_info().await?;
    if info.state == ClusterState::Fail {
        return Err(AdminError::Preflight(format!(
            "{} does not belong to a healthy cluster",
            existing_node
        )));
    }

    println!("step 2: validating the new node");
    let new_client = pool.connect(new_node).await?;
    let new_info = new_client.cluster_info().await?;
    if new_info.state != ClusterState::Fail {
        // A node that has never joined anything reports state 'fail'.
        return Err(AdminError::Preflight(format!(
            "{} is already part of a cluster; reset it first with CLUSTER RESET HARD",
            new_node
        )));
    }

    if let Some(primary_id) = master_id {
        println!("step 3: validating the target primary");
        let view = entry.cluster_view().await?;
        match view.get(primary_id) {
            Some(node) if node.is_primary() => {}
            Some(_) => {
                return Err(AdminError::Preflight(format!(
                    "node {} exists but is not a primary",
                    short_id(primary_id)
                )));
            }
            None => {
                return Err(AdminError::Preflight(format!(
                    "no node with id {} in the cluster",
                    short_id(primary_id)
                )));
            }
        }
    }

    println!("step 4: introducing the node (CLUSTER MEET)");
    let (existing_host, existing_port) = parse_address(existing_node)?;
    new_client
        .cluster_meet(&existing_host, existing_port)
        .await
        .map_err(|e| AdminError::Topology(format!("CLUSTER MEET failed: {}", e)))?;

    // Everything after MEET is rolled back on failure so a half-joined node
    // is not left dangling in the membership.
    match finish_join(pool, &entry, &new_client, existing_node, master_id).await {
        Ok(new_id) => {
            println!();
            println!("node added");
            println!("  id: {}", new_id);
            println!("  address: {}", new_client.address());
            match master_id {
                Some(id) => println!("  role: replica of {}", short_id(id)),
                None => {
                    println!("  role: primary, 0 slots");
                    println!("  assign slots with: valkeyctl reshard --to {} ...", short_id(&new_id));
                }
            }
            Ok(())
        }
        Err(err) => {
            println!("join failed after MEET; rolling back");
            rollback(pool, &entry, new_node).await;
            Err(err)
        }
    }
}

async fn finish_join(
    pool: &ConnectionPool,
    entry: &NodeClient,
    new_client: &NodeClient,
    existing_node: &str,
    master_id: Option<&str>,
) -> Result<String> {
    if let Some(primary_id) = master_id {
        println!("step 5: waiting for the cluster view to converge");
        if wait_for_convergence(pool, existing_node, CONVERGENCE_TIMEOUT)
            .await
            .is_err()
        {
            println!("  warning: convergence timed out; attempting replication anyway");
        }

        println!("  configuring replication");
        let mut attempt = 1;
        loop {
            match new_client.cluster_replicate(primary_id).await {
                Ok(()) => break,
                Err(err) if is_unknown_node(&err) && attempt < REPLICATE_ATTEMPTS => {
                    println!(
                        "  primary not yet known to the new node, retrying ({}/{})",
                        attempt, REPLICATE_ATTEMPTS
                    );
                    attempt += 1;
                    tokio::time::sleep(REPLICATE_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(AdminError::Topology(format!(
                        "CLUSTER REPLICATE failed: {}",
                        err
                    )));
                }
            }
        }
    }

    println!("step 6: verifying membership");
    let new_id = new_client.cluster_myid().await?;
    for attempt in 1..=VISIBILITY_ATTEMPTS {
        let view = entry.cluster_view().await?;
        if view.get(&new_id).is_some() {
            return Ok(new_id);
        }
        if attempt < VISIBILITY_ATTEMPTS {
            tokio::time::sleep(VISIBILITY_RETRY_DELAY).await;
        }
    }

    Err(AdminError::Convergence(format!(
        "node {} never appeared in the cluster view",
        short_id(&new_id)
    )))
}

/// The store reports an unrecognized node id as an "Unknown node" error.
fn is_unknown_node(err: &ValkeyError) -> bool {
    err.to_string().to_lowercase().contains("unknown node")
}

/// Best-effort rollback: hard-reset the new node, then remove it from every
/// other member's view. Failures here are reported but never mask the
/// original error.
async fn rollback(pool: &ConnectionPool, entry: &NodeClient, new_node: &str) {
    match pool.connect(new_node).await {
        Ok(client) => {
            if let Err(err) = client.cluster_reset(true).await {
                warn!(address = %new_node, error = %err, "rollback reset failed");
                println!("  warning: could not reset {}: {}", new_node, err);
            }
        }
        Err(err) => {
            warn!(address = %new_node, error = %err, "rollback could not reach the new node");
            println!("  warning: could not reach {} to reset it", new_node);
        }
    }

    let Ok(view) = entry.cluster_view().await else {
        println!("  warning: could not fetch the view to forget the new node");
        return;
    };
    let normalized = normalize_address(new_node);
    let Some(joined) = view.find_by_address(&normalized) else {
        // MEET never propagated; nothing to forget.
        return;
    };
    let doomed = joined.id.clone();

    for member in &view.nodes {
        if member.id == doomed || member.flags.fail {
            continue;
        }
        let Some((host, port)) = &member.endpoint else {
            continue;
        };
        let address = format!("{}:{}", host, port);
        let result = match pool.connect(&address).await {
            Ok(client) => client.cluster_forget(&doomed).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(address = %address, error = %err, "rollback forget failed");
        }
    }
    println!("  rollback finished (best effort)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fred::error::{Error, ErrorKind};

    #[test]
    fn unknown_node_rejection_is_detected() {
        let err = ValkeyError::Valkey(Error::new(
            ErrorKind::Unknown,
            "ERR Unknown node 07c37dfeb235213a872192d90877d0cd55635b91",
        ));
        assert!(is_unknown_node(&err));

        let other = ValkeyError::Connection {
            address: "127.0.0.1:7001".to_string(),
            reason: "refused".to_string(),
        };
        assert!(!is_unknown_node(&other));
    }
}

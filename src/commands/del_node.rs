//! `del-node`: evict a node, draining its slots first when it is a primary.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::client::migrate::{MigrationEndpoint, SlotMigrator, DEFAULT_PIPELINE};
use crate::client::node_client::NodeClient;
use crate::client::pool::ConnectionPool;
use crate::error::{AdminError, Result};
use crate::report::short_id;
use crate::settings::Settings;

/// How long to poll for the node to disappear from the view.
const REMOVAL_TIMEOUT: Duration = Duration::from_secs(8);

pub async fn run(settings: &Settings, cluster_node: &str, node_id: &str) -> Result<()> {
    settings.require_password()?;

    let pool = ConnectionPool::new(settings.clone());
    let result = del_node(&pool, cluster_node, node_id).await;
    pool.close_all().await;
    result
}

async fn del_node(pool: &ConnectionPool, cluster_node: &str, node_id: &str) -> Result<()> {
    println!("removing node {} via {}", short_id(node_id), cluster_node);

    let entry = pool.connect(cluster_node).await?;
    let view = entry.cluster_view().await?;
    let target = view
        .get(node_id)
        .ok_or_else(|| AdminError::Input(format!("node id {} not found in the cluster", node_id)))?
        .clone();

    println!("  node: {} ({})", target.address, target.role());

    // The node itself being down is not fatal; the membership entry can
    // still be removed from everyone else.
    let reachable = match &target.endpoint {
        Some((host, port)) => pool.connect(&format!("{}:{}", host, port)).await.is_ok(),
        None => false,
    };
    if !reachable {
        println!("  warning: the node itself is unreachable; it may already be down");
        println!("  continuing will only remove it from the remaining members' views");
    }

    if target.is_primary() {
        let others: Vec<_> = view
            .primaries()
            .into_iter()
            .filter(|p| p.id != node_id && !p.flags.fail)
            .collect();
        if others.len() < 2 {
            return Err(AdminError::Preflight(format!(
                "removing this primary would leave {} primaries; at least 3 are required",
                others.len()
            )));
        }

        let slots = target.owned_slots();
        if !slots.is_empty() {
            println!(
                "  primary owns {} slots; draining them across {} primaries first",
                slots.len(),
                others.len()
            );

            let source = MigrationEndpoint::from_node(&target).ok_or_else(|| {
                AdminError::Preflight(
                    "the primary advertises no usable address, cannot drain its slots".to_string(),
                )
            })?;

            let migrator = SlotMigrator::new(pool, DEFAULT_PIPELINE);
            let per_receiver = slots.len() / others.len();
            let remainder = slots.len() % others.len();
            let mut cursor = 0usize;
            let mut drained = 0usize;

            for (index, receiver) in others.iter().enumerate() {
                let count = per_receiver + usize::from(index < remainder);
                if count == 0 {
                    continue;
                }
                let chunk = &slots[cursor..cursor + count];
                cursor += count;

                let dest = MigrationEndpoint::from_node(receiver).ok_or_else(|| {
                    AdminError::Preflight(format!(
                        "receiver {} advertises no usable address",
                        receiver.address
                    ))
                })?;

                println!("  moving {} slots to {}", count, receiver.address);
                match migrator.move_slots(&entry, &source, &dest, chunk).await {
                    Ok(moved) => drained += moved.len(),
                    Err(failure) => {
                        println!();
                        println!("drain aborted: {}", failure);
                        println!(
                            "  {} slots were drained before the failure; no rollback attempted",
                            drained + failure.moved.len()
                        );
                        println!("  inspect the cluster with: valkeyctl check {}", cluster_node);
                        return Err(AdminError::Topology(failure.to_string()));
                    }
                }
            }
            println!("  drain complete: {} slots redistributed", drained);
        }
    }

    println!("  issuing CLUSTER FORGET on every member");
    forget_on_all_members(pool, &entry, node_id).await?;

    println!("  waiting for the node to disappear from the view");
    let start = Instant::now();
    loop {
        let current = entry.cluster_view().await?;
        if current.get(node_id).is_none() {
            println!();
            println!("node {} removed", short_id(node_id));
            return Ok(());
        }
        if start.elapsed() > REMOVAL_TIMEOUT {
            return Err(AdminError::Convergence(format!(
                "node {} still present in the view after {:?}",
                short_id(node_id),
                REMOVAL_TIMEOUT
            )));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Send `CLUSTER FORGET` to every reachable member other than the doomed
/// node. Per-member failures are tolerated as long as at least one forget
/// lands; a replica still following the doomed primary rejects the command,
/// which falls under the same tolerance.
async fn forget_on_all_members(
    pool: &ConnectionPool,
    entry: &NodeClient,
    node_id: &str,
) -> Result<()> {
    let view = entry.cluster_view().await?;

    let mut attempted = 0u32;
    let mut succeeded = 0u32;
    let mut last_error = String::new();

    for member in &view.nodes {
        if member.id == node_id || member.flags.fail {
            continue;
        }
        let Some((host, port)) = &member.endpoint else {
            continue;
        };
        attempted += 1;

        let address = format!("{}:{}", host, port);
        let result = match pool.connect(&address).await {
            Ok(client) => client.cluster_forget(node_id).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => succeeded += 1,
            Err(err) => {
                warn!(address = %address, error = %err, "CLUSTER FORGET failed on member");
                last_error = err.to_string();
            }
        }
    }

    if attempted > 0 && succeeded == 0 {
        return Err(AdminError::Topology(format!(
            "CLUSTER FORGET failed on every member; last error: {}",
            last_error
        )));
    }
    if succeeded < attempted {
        println!(
            "  warning: forget succeeded on {}/{} members; stragglers will converge via gossip",
            succeeded, attempted
        );
    }
    Ok(())
}

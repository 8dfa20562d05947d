//! `rebalance`: even out slot distribution across primaries.

use std::collections::HashMap;

use crate::client::migrate::{MigrationEndpoint, SlotMigrator};
use crate::client::pool::ConnectionPool;
use crate::client::types::{ClusterState, ClusterView};
use crate::error::{AdminError, Result};
use crate::settings::Settings;
use crate::slots::planner::{apply_plan, build_plan, imbalance_percent, total_planned_slots, PrimaryLoad};

pub async fn run(
    settings: &Settings,
    cluster_node: &str,
    dry_run: bool,
    threshold: u32,
    pipeline: usize,
) -> Result<()> {
    settings.require_password()?;

    let pool = ConnectionPool::new(settings.clone());
    let result = rebalance(&pool, cluster_node, dry_run, threshold, pipeline).await;
    pool.close_all().await;
    result
}

async fn rebalance(
    pool: &ConnectionPool,
    cluster_node: &str,
    dry_run: bool,
    threshold: u32,
    pipeline: usize,
) -> Result<()> {
    println!("rebalancing cluster via {}", cluster_node);
    if dry_run {
        println!("dry run: the plan will be printed but not executed");
    }

    let entry = pool.connect(cluster_node).await?;
    let info = entry.cluster_info().await?;
    if info.state != ClusterState::Ok {
        return Err(AdminError::Preflight(format!(
            "cluster state is '{}'; resolve cluster problems before rebalancing",
            info.state
        )));
    }

    let view = entry.cluster_view().await?;
    ensure_stable_for_rebalance(&view)?;

    let primaries: Vec<PrimaryLoad> = view
        .primaries()
        .iter()
        .map(|p| PrimaryLoad::new(p.id.clone(), p.address.clone(), p.owned_slots()))
        .collect();
    if primaries.is_empty() {
        return Err(AdminError::Preflight(
            "cluster has no primaries".to_string(),
        ));
    }

    print_topology_advisory(&view);

    let imbalance = imbalance_percent(&primaries);
    println!("current imbalance: {:.1}%", imbalance);
    if imbalance < f64::from(threshold) {
        println!(
            "cluster is already balanced (below the {}% threshold), nothing to do",
            threshold
        );
        return Ok(());
    }

    let plan = build_plan(&primaries);
    if plan.is_empty() {
        println!("no donor/receiver pairs found, nothing to do");
        return Ok(());
    }

    println!();
    println!("current distribution:");
    for primary in &primaries {
        println!("  {}: {} slots", primary.address, primary.slots.len());
    }

    let total = total_planned_slots(&plan);
    let address_of: HashMap<&str, &str> = primaries
        .iter()
        .map(|p| (p.id.as_str(), p.address.as_str()))
        .collect();

    println!("plan:");
    for (index, step) in plan.iter().enumerate() {
        println!(
            "  {}. {} -> {}: {} slots",
            index + 1,
            address_of.get(step.from_id.as_str()).unwrap_or(&"?"),
            address_of.get(step.to_id.as_str()).unwrap_or(&"?"),
            step.slot_count()
        );
    }
    println!("total slots to move: {}", total);

    if dry_run {
        let projected = imbalance_percent(&apply_plan(&primaries, &plan));
        println!("projected imbalance after applying: {:.1}%", projected);
        println!("dry run: no changes made");
        return Ok(());
    }

    let migrator = SlotMigrator::new(pool, pipeline);
    let mut processed = 0usize;

    for (index, step) in plan.iter().enumerate() {
        println!(
            "step {}/{}: moving {} slots",
            index + 1,
            plan.len(),
            step.slot_count()
        );

        let source = endpoint_for(&view, &step.from_id)?;
        let target = endpoint_for(&view, &step.to_id)?;

        match migrator
            .move_slots(&entry, &source, &target, &step.slots)
            .await
        {
            Ok(moved) => {
                processed += moved.len();
                println!(
                    "  step complete ({}/{} slots overall, {:.1}%)",
                    processed,
                    total,
                    processed as f64 / total as f64 * 100.0
                );
            }
            Err(failure) => {
                println!();
                println!("rebalance aborted during step {}: {}", index + 1, failure);
                println!(
                    "  {}/{} slots were moved before the failure; no rollback attempted",
                    processed + failure.moved.len(),
                    total
                );
                println!("  inspect the cluster with: valkeyctl check {}", cluster_node);
                return Err(AdminError::Topology(failure.to_string()));
            }
        }
    }

    let final_view = entry.cluster_view().await?;
    let final_loads: Vec<PrimaryLoad> = final_view
        .primaries()
        .iter()
        .map(|p| PrimaryLoad::new(p.id.clone(), p.address.clone(), p.owned_slots()))
        .collect();
    println!();
    println!("rebalance complete");
    println!("final imbalance: {:.1}%", imbalance_percent(&final_loads));

    Ok(())
}

/// A rebalance on top of unstable membership or an in-flight migration
/// compounds partial states, so both are rejected outright.
fn ensure_stable_for_rebalance(view: &ClusterView) -> Result<()> {
    for node in &view.nodes {
        if node.flags.fail || node.flags.handshake {
            return Err(AdminError::Preflight(format!(
                "node {} is in an unstable state; resolve it before rebalancing",
                node.address
            )));
        }
        if node.transient_slots > 0 {
            return Err(AdminError::Preflight(format!(
                "node {} has a slot migration in progress; wait for it to finish",
                node.address
            )));
        }
    }
    Ok(())
}

fn endpoint_for(view: &ClusterView, node_id: &str) -> Result<MigrationEndpoint> {
    let node = view
        .get(node_id)
        .ok_or_else(|| AdminError::Topology(format!("node {} vanished from the view", node_id)))?;
    MigrationEndpoint::from_node(node).ok_or_else(|| {
        AdminError::Preflight(format!("node {} advertises no usable address", node_id))
    })
}

/// Advisory only: highlights topology weaknesses before planning, never
/// blocks the rebalance.
fn print_topology_advisory(view: &ClusterView) {
    let primaries = view.primaries();
    let replicas = view.replicas();
    println!(
        "topology: {} primaries, {} replicas",
        primaries.len(),
        replicas.len()
    );

    if primaries.len() < 3 {
        println!("  warning: fewer than 3 primaries; the cluster is below the operable minimum");
    }
    if replicas.is_empty() {
        println!("  warning: no replicas; a primary failure loses its shard");
    } else {
        let mut per_primary: HashMap<&str, usize> = HashMap::new();
        for replica in &replicas {
            if let Some(primary_id) = replica.primary_id.as_deref() {
                *per_primary.entry(primary_id).or_insert(0) += 1;
            }
        }
        let max = per_primary.values().copied().max().unwrap_or(0);
        let min = if per_primary.len() < primaries.len() {
            0
        } else {
            per_primary.values().copied().min().unwrap_or(0)
        };
        if max.saturating_sub(min) > 1 {
            println!("  warning: replica distribution is uneven (manual reassignment needed)");
        }
    }
}

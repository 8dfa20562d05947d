//! `reshard`: move N slots from one primary to another with live data
//! migration.

use std::time::Duration;

use crate::client::migrate::{MigrationEndpoint, SlotMigrator};
use crate::client::pool::ConnectionPool;
use crate::client::types::ClusterState;
use crate::error::{AdminError, Result};
use crate::report::format_slot_ranges;
use crate::settings::Settings;

pub async fn run(
    settings: &Settings,
    cluster_node: &str,
    from: &str,
    to: &str,
    slots: u32,
    pipeline: usize,
) -> Result<()> {
    settings.require_password()?;

    if slots == 0 {
        return Err(AdminError::Input(
            "--slots must be greater than zero".to_string(),
        ));
    }
    if from == to {
        return Err(AdminError::Input(
            "source and target node ids are identical".to_string(),
        ));
    }

    let pool = ConnectionPool::new(settings.clone());
    let result = reshard(&pool, cluster_node, from, to, slots, pipeline).await;
    pool.close_all().await;
    result
}

async fn reshard(
    pool: &ConnectionPool,
    cluster_node: &str,
    from: &str,
    to: &str,
    slots: u32,
    pipeline: usize,
) -> Result<()> {
    println!("resharding via {}", cluster_node);
    println!("  source: {}", from);
    println!("  target: {}", to);
    println!("  slots: {}", slots);
    println!("  pipeline: {}", pipeline);

    println!("step 1: connecting and validating cluster state");
    let entry = pool.connect(cluster_node).await?;
    let info = entry.cluster_info().await?;
    if info.state != ClusterState::Ok {
        return Err(AdminError::Preflight(format!(
            "cluster state is '{}', expected 'ok'",
            info.state
        )));
    }

    println!("step 2: resolving source and target");
    let view = entry.cluster_view().await?;

    let source_node = view
        .get(from)
        .ok_or_else(|| AdminError::Input(format!("source node id {} not found", from)))?;
    if !source_node.is_primary() {
        return Err(AdminError::Preflight(format!(
            "source node {} is not a primary",
            from
        )));
    }
    let target_node = view
        .get(to)
        .ok_or_else(|| AdminError::Input(format!("target node id {} not found", to)))?;
    if !target_node.is_primary() {
        return Err(AdminError::Preflight(format!(
            "target node {} is not a primary",
            to
        )));
    }

    let source_count = source_node.slot_count();
    if source_count < slots {
        return Err(AdminError::Preflight(format!(
            "source owns {} slots, fewer than the {} requested",
            source_count, slots
        )));
    }
    let target_count = target_node.slot_count();

    let source = MigrationEndpoint::from_node(source_node).ok_or_else(|| {
        AdminError::Preflight(format!("source node {} advertises no usable address", from))
    })?;
    let target = MigrationEndpoint::from_node(target_node).ok_or_else(|| {
        AdminError::Preflight(format!("target node {} advertises no usable address", to))
    })?;
    println!("  source: {} ({} slots)", source.address(), source_count);
    println!("  target: {} ({} slots)", target.address(), target_count);

    println!("step 3: selecting slots to move");
    let slots_to_move: Vec<u16> = source_node
        .owned_slots()
        .into_iter()
        .take(slots as usize)
        .collect();
    println!("  selected: {}", format_slot_ranges(&slots_to_move));

    println!("step 4: migrating slots");
    let migrator = SlotMigrator::new(pool, pipeline);
    let moved = match migrator
        .move_slots(&entry, &source, &target, &slots_to_move)
        .await
    {
        Ok(moved) => moved,
        Err(failure) => {
            println!();
            println!("reshard aborted: {}", failure);
            println!("  completed slots: {}", format_slot_ranges(&failure.moved));
            println!("  failed slot {} stays with the source; no rollback attempted", failure.failed_at);
            println!("  inspect the cluster with: valkeyctl check {}", cluster_node);
            return Err(AdminError::Topology(failure.to_string()));
        }
    };

    println!("step 5: waiting for the cluster to stabilize");
    if entry.wait_for_state_ok(Duration::from_secs(10)).await.is_err() {
        println!("  stabilization timed out; proceeding after a fixed delay");
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let updated = entry.cluster_view().await?;
    let new_source_count = updated.get(from).map(|n| n.slot_count()).unwrap_or(0);
    let new_target_count = updated.get(to).map(|n| n.slot_count()).unwrap_or(0);

    println!();
    println!("reshard complete");
    println!("  slots moved: {}", moved.len());
    println!(
        "  source {}: {} -> {} slots",
        source.address(),
        source_count,
        new_source_count
    );
    println!(
        "  target {}: {} -> {} slots",
        target.address(),
        target_count,
        new_target_count
    );

    Ok(())
}

//! `check`: audit cluster health and topology.
//!
//! Read-only. Collects the view and info from the entry node, estimates the
//! key count, applies the health rules, and cross-validates the view every
//! reachable member reports. Exits zero unless the entry node itself is
//! unreachable.

use std::time::Duration;

use futures::future::join_all;

use crate::client::pool::ConnectionPool;
use crate::client::types::{ClusterNode, ClusterState, ClusterView};
use crate::client::view::{
    canonical_view, estimate_from_samples, health_findings, sample_slots, ClusterStatus,
    FailRequery, Finding, Severity,
};
use crate::error::Result;
use crate::report::{format_count, format_slot_ranges, short_id};
use crate::settings::Settings;

/// Delay before the single automated re-query of a `fail` state.
const FAIL_REQUERY_DELAY: Duration = Duration::from_secs(2);

pub async fn run(
    settings: &Settings,
    cluster_node: &str,
    verbose: bool,
    raw: bool,
    dbsize: bool,
) -> Result<()> {
    settings.require_password()?;

    let pool = ConnectionPool::new(settings.clone());
    let result = check(&pool, cluster_node, verbose, raw, dbsize).await;
    pool.close_all().await;
    result
}

async fn check(
    pool: &ConnectionPool,
    cluster_node: &str,
    verbose: bool,
    raw: bool,
    dbsize: bool,
) -> Result<()> {
    println!("checking cluster at {}", cluster_node);

    let entry = pool.connect(cluster_node).await?;
    let raw_nodes = entry.cluster_nodes_raw().await?;
    let view = ClusterView::parse(&raw_nodes);
    if view.malformed_lines > 0 {
        println!(
            "warning: {} malformed node line(s) ignored",
            view.malformed_lines
        );
    }
    let info = entry.cluster_info().await?;

    if raw {
        println!();
        println!("raw cluster view:");
        println!("{}", raw_nodes.trim_end());
    }

    // A 'fail' state is often a transient gossip lag; one re-query after a
    // short delay is the only automated re-check.
    let fail_requery = if info.state == ClusterState::Fail {
        println!("cluster state 'fail' observed; re-querying in 2s");
        tokio::time::sleep(FAIL_REQUERY_DELAY).await;
        match entry.cluster_info().await {
            Ok(second) if second.state == ClusterState::Ok => {
                println!("  state recovered to 'ok'");
                FailRequery::Recovered
            }
            _ => {
                println!("  state still 'fail'");
                FailRequery::Persisted
            }
        }
    } else {
        FailRequery::NotFail
    };

    let (total_keys, precise) = if dbsize {
        (precise_key_count(pool, &view).await, true)
    } else {
        (sampled_key_count(pool, &view).await, false)
    };

    let covered_slots = view.covered_slot_count();
    let status = ClusterStatus {
        view,
        state: info.state,
        covered_slots,
        known_nodes: info.known_nodes,
        cluster_size: info.cluster_size,
        current_epoch: info.current_epoch,
        total_keys,
        precise_keys: precise,
    };

    print_overview(&status, verbose, fail_requery);

    let mut findings = health_findings(&status, fail_requery);
    findings.extend(consistency_findings(pool, &status).await);
    print_findings(&findings);

    Ok(())
}

/// Exact count: `COUNTKEYSINSLOT` for every owned slot, summed per primary.
async fn precise_key_count(pool: &ConnectionPool, view: &ClusterView) -> Option<u64> {
    let mut total = 0u64;
    let mut any = false;
    for primary in view.primaries() {
        if primary.flags.fail {
            continue;
        }
        let Some((host, port)) = &primary.endpoint else {
            continue;
        };
        let Ok(client) = pool.connect(&format!("{}:{}", host, port)).await else {
            continue;
        };
        for slot in primary.owned_slots() {
            if let Ok(count) = client.cluster_count_keys_in_slot(slot).await {
                total += count;
                any = true;
            }
        }
    }
    any.then_some(total)
}

/// Sampled estimate: count 20 evenly spaced slots on their owners, average,
/// scale to the full keyspace. Documented as an estimate in the output.
async fn sampled_key_count(pool: &ConnectionPool, view: &ClusterView) -> Option<u64> {
    let mut sampled = 0u64;
    let mut valid = 0u32;

    for slot in sample_slots() {
        let owner = view
            .nodes
            .iter()
            .find(|n| n.slots.iter().any(|r| r.contains(slot)));
        let Some(owner) = owner else {
            continue;
        };
        let Some((host, port)) = &owner.endpoint else {
            continue;
        };
        let Ok(client) = pool.connect(&format!("{}:{}", host, port)).await else {
            continue;
        };
        if let Ok(count) = client.cluster_count_keys_in_slot(slot).await {
            sampled += count;
            valid += 1;
        }
    }

    (valid > 0).then(|| estimate_from_samples(sampled, valid))
}

/// Query every reachable non-failed member for its view and compare
/// canonical forms. Scans run in parallel; results are reported in the
/// view's node order.
async fn consistency_findings(pool: &ConnectionPool, status: &ClusterStatus) -> Vec<Finding> {
    let addresses: Vec<String> = status
        .view
        .nodes
        .iter()
        .filter(|n| !n.flags.fail)
        .filter_map(|n| n.endpoint.as_ref())
        .map(|(host, port)| format!("{}:{}", host, port))
        .collect();

    let scans = join_all(addresses.iter().enumerate().map(|(index, address)| async move {
        let outcome: std::result::Result<String, String> = async {
            let client = pool.connect(address).await.map_err(|e| e.to_string())?;
            let raw = client.cluster_nodes_raw().await.map_err(|e| e.to_string())?;
            Ok(canonical_view(&ClusterView::parse(&raw)))
        }
        .await;
        (index, outcome)
    }))
    .await;

    let mut ordered = scans;
    ordered.sort_by_key(|(index, _)| *index);

    let mut findings = Vec::new();
    let mut canonical: Vec<(&str, String)> = Vec::new();
    for (index, outcome) in ordered {
        match outcome {
            Ok(form) => canonical.push((addresses[index].as_str(), form)),
            Err(reason) => findings.push(Finding::warning(format!(
                "could not fetch the view from {}: {}",
                addresses[index], reason
            ))),
        }
    }

    if let Some((_, reference)) = canonical.first() {
        let divergent: Vec<&str> = canonical
            .iter()
            .skip(1)
            .filter(|(_, form)| form != reference)
            .map(|(address, _)| *address)
            .collect();
        if !divergent.is_empty() {
            let healthy =
                status.state == ClusterState::Ok && status.healthy_apart_from_state();
            let message = format!(
                "{} node(s) report a diverging cluster view: {}",
                divergent.len(),
                divergent.join(", ")
            );
            findings.push(if healthy {
                Finding::info(format!("{} (cluster healthy; likely a timing difference)", message))
            } else {
                Finding::warning(message)
            });
        }
    }

    findings
}

fn print_overview(status: &ClusterStatus, verbose: bool, fail_requery: FailRequery) {
    println!();
    println!("cluster overview");
    println!(
        "  nodes: {} ({} primaries, {} replicas)",
        status.view.nodes.len(),
        status.view.primaries().len(),
        status.view.replicas().len()
    );
    println!(
        "  slot coverage: {}/16384 ({:.1}%)",
        status.covered_slots,
        f64::from(status.covered_slots) / 163.84
    );
    if let Some(keys) = status.total_keys {
        if status.precise_keys {
            println!("  keys (exact): {}", format_count(keys as i64));
        } else {
            println!(
                "  keys (estimated from sampled slots): {}",
                format_count(keys as i64)
            );
        }
    }

    let state = match (status.state, fail_requery) {
        (ClusterState::Fail, FailRequery::Recovered) => "ok (transient 'fail' observed)".to_string(),
        (state, _) => state.to_string(),
    };
    println!("  state: {}", state);
    println!(
        "  cluster size: {}, known nodes: {}, epoch: {}",
        status.cluster_size, status.known_nodes, status.current_epoch
    );

    println!();
    println!("nodes:");
    let mut sorted: Vec<&ClusterNode> = status.view.nodes.iter().collect();
    sorted.sort_by(|a, b| {
        b.is_primary()
            .cmp(&a.is_primary())
            .then_with(|| a.address.cmp(&b.address))
    });
    for node in sorted {
        if verbose {
            print_node_verbose(node);
        } else {
            print_node_compact(node);
        }
    }
}

fn print_node_compact(node: &ClusterNode) {
    let mut line = format!(
        "  {:7} {} | {}",
        node.role().to_string(),
        node.address,
        short_id(&node.id)
    );
    if !node.slots.is_empty() {
        line.push_str(&format!(" | slots: {}", node.slot_count()));
        if node.slots.len() <= 3 {
            let ranges: Vec<String> = node.slots.iter().map(|r| r.to_string()).collect();
            line.push_str(&format!(" ({})", ranges.join(", ")));
        }
    }
    if let Some(primary_id) = &node.primary_id {
        line.push_str(&format!(" | primary: {}", short_id(primary_id)));
    }
    if node.flags.fail {
        line.push_str(" | FAILED");
    }
    println!("{}", line);
}

fn print_node_verbose(node: &ClusterNode) {
    println!("  {} {}", node.role(), node.address);
    println!("    id: {}", node.id);
    println!("    flags: {}", flag_list(node));
    println!(
        "    epoch: {}, link: {}, ping-sent: {}, pong-recv: {}",
        node.config_epoch, node.link_state, node.ping_sent, node.pong_recv
    );
    if let Some(primary_id) = &node.primary_id {
        println!("    primary: {}", primary_id);
    }
    if !node.slots.is_empty() {
        let slots = node.owned_slots();
        println!(
            "    slots: {} ({})",
            node.slot_count(),
            format_slot_ranges(&slots)
        );
    }
    if node.transient_slots > 0 {
        println!("    transient slot markers: {}", node.transient_slots);
    }
    println!();
}

fn flag_list(node: &ClusterNode) -> String {
    let flags = &node.flags;
    let mut out = Vec::new();
    if flags.myself {
        out.push("myself");
    }
    if flags.primary {
        out.push("master");
    }
    if flags.replica {
        out.push("slave");
    }
    if flags.fail {
        out.push("fail");
    }
    if flags.handshake {
        out.push("handshake");
    }
    if flags.noaddr {
        out.push("noaddr");
    }
    if out.is_empty() {
        "noflags".to_string()
    } else {
        out.join(",")
    }
}

fn print_findings(findings: &[Finding]) {
    println!();
    println!("health report");
    if findings.is_empty() {
        println!("  all health checks passed");
        return;
    }
    for (index, finding) in findings.iter().enumerate() {
        println!("  {}. [{}] {}", index + 1, finding.severity, finding.message);
    }
    let warnings = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    println!();
    println!(
        "  {} finding(s), {} warning(s)",
        findings.len(),
        warnings
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_list_renders_all_set_flags() {
        let node = ClusterNode::parse_line(
            "aaaa 127.0.0.1:7001@17001 myself,master - 0 0 1 connected 0-10",
        )
        .unwrap();
        assert_eq!(flag_list(&node), "myself,master");
    }
}

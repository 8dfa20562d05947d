//! High-level cluster operations composed from low-level commands.
//!
//! Parsed variants of the raw payload queries, plus the polling waits that
//! topology-mutating flows rely on: cluster-state stabilization and
//! cross-node view convergence.

use std::time::{Duration, Instant};

use fred::prelude::Value;
use tracing::{debug, instrument, warn};

use crate::client::node_client::{NodeClient, ValkeyError};
use crate::client::pool::ConnectionPool;
use crate::client::types::{ClusterInfo, ClusterState, ClusterView};
use crate::client::view::convergence_signature;

/// Poll interval for stabilization waits.
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval for convergence waits.
const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl NodeClient {
    /// Parsed `CLUSTER INFO`.
    #[instrument(skip(self))]
    pub async fn cluster_info(&self) -> Result<ClusterInfo, ValkeyError> {
        let raw = self.cluster_info_raw().await?;
        let info = ClusterInfo::parse(&raw)?;
        Ok(info)
    }

    /// Parsed `CLUSTER NODES`. Malformed lines are dropped and counted on
    /// the returned view.
    #[instrument(skip(self))]
    pub async fn cluster_view(&self) -> Result<ClusterView, ValkeyError> {
        let raw = self.cluster_nodes_raw().await?;
        Ok(ClusterView::parse(&raw))
    }

    /// Poll `CLUSTER INFO` until the state is `ok` or the timeout expires.
    #[instrument(skip(self))]
    pub async fn wait_for_state_ok(&self, timeout: Duration) -> Result<(), ValkeyError> {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                return Err(ValkeyError::Timeout {
                    operation: format!("waiting for cluster state ok on {}", self.address()),
                    duration: timeout,
                });
            }
            match self.cluster_info().await {
                Ok(info) if info.state == ClusterState::Ok => return Ok(()),
                Ok(info) => {
                    debug!(state = %info.state, slots_assigned = info.slots_assigned, "cluster not yet stable");
                }
                Err(err) => {
                    warn!(error = %err, "error polling cluster state");
                }
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }
    }

    /// Total slots covered according to `CLUSTER SLOTS`.
    #[instrument(skip(self))]
    pub async fn covered_slot_total(&self) -> Result<u32, ValkeyError> {
        let raw = self.cluster_slots_raw().await?;
        Ok(covered_from_slots_reply(&raw))
    }
}

/// Sum the widths of the slot ranges in a `CLUSTER SLOTS` reply.
fn covered_from_slots_reply(value: &Value) -> u32 {
    let mut covered = 0u32;
    if let Value::Array(rows) = value {
        for row in rows {
            if let Value::Array(fields) = row {
                if fields.len() >= 2 {
                    if let (Some(start), Some(end)) = (fields[0].as_i64(), fields[1].as_i64()) {
                        if end >= start {
                            covered += (end - start + 1) as u32;
                        }
                    }
                }
            }
        }
    }
    covered
}

/// Wait until every reachable primary reports the same canonical view
/// signature. Replication setup and membership changes cannot land reliably
/// before the members agree on who is in the cluster.
///
/// Callers decide what a timeout means; most degrade to a warning and a
/// fixed sleep rather than aborting.
pub async fn wait_for_convergence(
    pool: &ConnectionPool,
    entry_address: &str,
    timeout: Duration,
) -> Result<(), ValkeyError> {
    let start = Instant::now();
    loop {
        match views_converged(pool, entry_address).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "convergence probe failed, retrying");
            }
        }
        if start.elapsed() > timeout {
            return Err(ValkeyError::Timeout {
                operation: format!("waiting for view convergence via {}", entry_address),
                duration: timeout,
            });
        }
        tokio::time::sleep(CONVERGENCE_POLL_INTERVAL).await;
    }
}

/// One convergence probe: compare canonical signatures across every
/// reachable primary in the entry node's view.
async fn views_converged(
    pool: &ConnectionPool,
    entry_address: &str,
) -> Result<bool, ValkeyError> {
    let entry = pool.connect(entry_address).await?;
    let view = entry.cluster_view().await?;

    let mut reference: Option<String> = None;
    for node in &view.nodes {
        if !node.is_primary() || node.flags.fail || !node.is_connected() {
            continue;
        }
        let Some((host, port)) = &node.endpoint else {
            continue;
        };

        let address = format!("{}:{}", host, port);
        let peer = match pool.connect(&address).await {
            Ok(client) => client,
            Err(err) => {
                debug!(address = %address, error = %err, "primary unreachable during convergence probe");
                return Ok(false);
            }
        };
        let peer_view = match peer.cluster_view().await {
            Ok(view) => view,
            Err(_) => return Ok(false),
        };

        let signature = convergence_signature(&peer_view);
        match &reference {
            None => reference = Some(signature),
            Some(first) if *first != signature => return Ok(false),
            Some(_) => {}
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots_reply(ranges: &[(i64, i64)]) -> Value {
        Value::Array(
            ranges
                .iter()
                .map(|(start, end)| {
                    Value::Array(vec![Value::Integer(*start), Value::Integer(*end)])
                })
                .collect(),
        )
    }

    #[test]
    fn covered_total_sums_ranges() {
        let reply = slots_reply(&[(0, 5460), (5461, 10922), (10923, 16383)]);
        assert_eq!(covered_from_slots_reply(&reply), 16384);
    }

    #[test]
    fn covered_total_handles_partial_and_empty() {
        assert_eq!(covered_from_slots_reply(&slots_reply(&[(0, 99)])), 100);
        assert_eq!(covered_from_slots_reply(&Value::Array(Vec::new())), 0);
        assert_eq!(covered_from_slots_reply(&Value::Null), 0);
    }
}

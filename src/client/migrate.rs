//! The slot migration engine.
//!
//! Moves slots one at a time from a source primary to a target primary and
//! publishes the new ownership to every reachable member. Shared by
//! `reshard`, `rebalance`, and the pre-removal drain in `del-node`.
//!
//! Slots within one batch are strictly sequential. Running key migration for
//! several slots concurrently would leave two-way partial states and MOVED
//! redirect storms for a single node to resolve, so the engine never does it.

use std::time::Duration;

use fred::error::ErrorKind;
use tracing::{debug, warn};

use crate::client::node_client::{NodeClient, SetSlotState, ValkeyError};
use crate::client::pool::ConnectionPool;
use crate::client::types::ClusterNode;
use crate::error::AdminError;
use crate::settings::MigrateAuth;
use crate::slots::migration::{MigrationFailure, MigrationState, SlotMigrationTracker};

/// Default number of keys fetched per `GETKEYSINSLOT` round.
pub const DEFAULT_PIPELINE: usize = 10;

/// Base delay for retrying a failed key migration; grows linearly with the
/// attempt number.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// One side of a slot move: a primary's id and client endpoint.
#[derive(Debug, Clone)]
pub struct MigrationEndpoint {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl MigrationEndpoint {
    /// Build an endpoint from a node record, if its address is usable.
    pub fn from_node(node: &ClusterNode) -> Option<Self> {
        let (host, port) = node.endpoint.clone()?;
        Some(Self {
            id: node.id.clone(),
            host,
            port,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Drives slot moves over pooled connections.
pub struct SlotMigrator<'a> {
    pool: &'a ConnectionPool,
    pipeline: usize,
    auth: MigrateAuth,
    max_retries: u32,
}

impl<'a> SlotMigrator<'a> {
    pub fn new(pool: &'a ConnectionPool, pipeline: usize) -> Self {
        let settings = pool.settings();
        Self {
            pool,
            pipeline: if pipeline == 0 {
                DEFAULT_PIPELINE
            } else {
                pipeline
            },
            auth: settings.migrate_auth(),
            max_retries: settings.max_retries.max(1),
        }
    }

    /// Move `slots` from `source` to `target`, sequentially and in order.
    ///
    /// On success returns the moved slots. On failure returns the
    /// partial-progress report: slots completed earlier stay with the
    /// target, the failed slot stays with the source, and nothing is rolled
    /// back automatically.
    pub async fn move_slots(
        &self,
        entry: &NodeClient,
        source: &MigrationEndpoint,
        target: &MigrationEndpoint,
        slots: &[u16],
    ) -> Result<Vec<u16>, MigrationFailure> {
        let total = slots.len();
        let stride = (total / 20).max(1);
        let mut moved = Vec::with_capacity(total);

        for (index, &slot) in slots.iter().enumerate() {
            match self.move_slot(entry, source, target, slot).await {
                Ok(keys_moved) => {
                    moved.push(slot);
                    debug!(slot, keys_moved, "slot moved");
                    if (index + 1) % stride == 0 || index + 1 == total {
                        println!(
                            "  progress: {}/{} slots moved ({}%)",
                            index + 1,
                            total,
                            (index + 1) * 100 / total
                        );
                    }
                }
                Err(err) => {
                    return Err(MigrationFailure {
                        moved,
                        failed_at: slot,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(moved)
    }

    /// Move a single slot through the full protocol. Returns the number of
    /// keys drained out of the slot.
    async fn move_slot(
        &self,
        entry: &NodeClient,
        source: &MigrationEndpoint,
        target: &MigrationEndpoint,
        slot: u16,
    ) -> Result<u64, AdminError> {
        let mut tracker = SlotMigrationTracker::new(slot, source.id.clone(), target.id.clone());

        let source_client = self.pool.connect(&source.address()).await?;
        let target_client = self.pool.connect(&target.address()).await?;

        source_client
            .cluster_setslot(slot, SetSlotState::Migrating(target.id.clone()))
            .await
            .map_err(|e| {
                AdminError::Topology(format!(
                    "SETSLOT {} MIGRATING on {}: {}",
                    slot,
                    source.address(),
                    e
                ))
            })?;
        tracker.advance(MigrationState::Migrating);

        target_client
            .cluster_setslot(slot, SetSlotState::Importing(source.id.clone()))
            .await
            .map_err(|e| {
                AdminError::Topology(format!(
                    "SETSLOT {} IMPORTING on {}: {}",
                    slot,
                    target.address(),
                    e
                ))
            })?;
        tracker.advance(MigrationState::Transferring { moved: 0 });

        // Drain until the source reports the slot empty. Re-querying is
        // idempotent: keys already migrated no longer show up.
        loop {
            let keys = source_client
                .cluster_get_keys_in_slot(slot, self.pipeline as u64)
                .await
                .map_err(|e| {
                    AdminError::Topology(format!("GETKEYSINSLOT {} on {}: {}", slot, source.address(), e))
                })?;
            if keys.is_empty() {
                break;
            }
            for key in &keys {
                self.migrate_key_with_retry(&source_client, target, slot, key)
                    .await?;
            }
            tracker.record_keys_moved(keys.len() as u64);
        }
        tracker.advance(MigrationState::Drained);

        // Finalize on both ends first, then tell everyone else.
        source_client
            .cluster_setslot(slot, SetSlotState::Node(target.id.clone()))
            .await
            .map_err(|e| {
                AdminError::Topology(format!(
                    "SETSLOT {} NODE on source {}: {}",
                    slot,
                    source.address(),
                    e
                ))
            })?;
        target_client
            .cluster_setslot(slot, SetSlotState::Node(target.id.clone()))
            .await
            .map_err(|e| {
                AdminError::Topology(format!(
                    "SETSLOT {} NODE on target {}: {}",
                    slot,
                    target.address(),
                    e
                ))
            })?;

        self.propagate_ownership(entry, source, target, slot).await?;

        tracker.complete();
        Ok(tracker.keys_moved)
    }

    /// Migrate one key, retrying network and timeout errors with linearly
    /// increasing backoff. Non-retryable rejections abort immediately.
    async fn migrate_key_with_retry(
        &self,
        source_client: &NodeClient,
        target: &MigrationEndpoint,
        slot: u16,
        key: &str,
    ) -> Result<(), AdminError> {
        let mut last_error: Option<ValkeyError> = None;

        for attempt in 1..=self.max_retries {
            match source_client
                .migrate_key(&target.host, target.port, key, &self.auth)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if is_retryable(&err) && attempt < self.max_retries => {
                    warn!(slot, key, attempt, error = %err, "retrying key migration");
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                    last_error = Some(err);
                }
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }

        Err(AdminError::DataPath {
            slot,
            key: key.to_string(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Publish the new owner to every reachable member other than the two
    /// endpoints. Individual failures are tolerated as long as at least one
    /// propagation lands; losing all of them would leave the rest of the
    /// cluster issuing MOVED redirects from stale state.
    async fn propagate_ownership(
        &self,
        entry: &NodeClient,
        source: &MigrationEndpoint,
        target: &MigrationEndpoint,
        slot: u16,
    ) -> Result<(), AdminError> {
        let view = entry.cluster_view().await.map_err(AdminError::from)?;

        let mut attempted = 0u32;
        let mut succeeded = 0u32;
        let mut last_error = String::new();

        for node in &view.nodes {
            if node.id == source.id || node.id == target.id || node.flags.fail {
                continue;
            }
            let Some((host, port)) = &node.endpoint else {
                continue;
            };
            attempted += 1;

            let address = format!("{}:{}", host, port);
            let result = match self.pool.connect(&address).await {
                Ok(client) => {
                    client
                        .cluster_setslot(slot, SetSlotState::Node(target.id.clone()))
                        .await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => succeeded += 1,
                Err(err) => {
                    warn!(slot, address = %address, error = %err, "ownership propagation failed on node");
                    last_error = err.to_string();
                }
            }
        }

        if attempted > 0 && succeeded == 0 {
            return Err(AdminError::Propagation {
                slot,
                reason: last_error,
            });
        }
        Ok(())
    }
}

/// Whether a key-migration error is worth retrying.
fn is_retryable(err: &ValkeyError) -> bool {
    match err {
        ValkeyError::Timeout { .. } | ValkeyError::Connection { .. } => true,
        ValkeyError::Valkey(inner) => {
            matches!(inner.kind(), ErrorKind::IO | ErrorKind::Timeout)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::ClusterNode;

    #[test]
    fn endpoint_from_node_requires_usable_address() {
        let line = "aaaa 127.0.0.1:7002@17002 master - 0 0 1 connected";
        let node = ClusterNode::parse_line(line).unwrap();
        let endpoint = MigrationEndpoint::from_node(&node).unwrap();
        assert_eq!(endpoint.address(), "127.0.0.1:7002");

        let lost = ClusterNode::parse_line("bbbb :0@0 master,noaddr - 0 0 1 disconnected").unwrap();
        assert!(MigrationEndpoint::from_node(&lost).is_none());
    }

    #[test]
    fn timeout_and_connection_errors_are_retryable() {
        let timeout = ValkeyError::Timeout {
            operation: "migrate".to_string(),
            duration: Duration::from_secs(60),
        };
        assert!(is_retryable(&timeout));

        let connection = ValkeyError::Connection {
            address: "127.0.0.1:7001".to_string(),
            reason: "refused".to_string(),
        };
        assert!(is_retryable(&connection));
    }

    #[test]
    fn parse_errors_are_not_retryable() {
        let err = ValkeyError::Parse(crate::client::types::ParseError::InvalidNodeLine(
            "x".to_string(),
        ));
        assert!(!is_retryable(&err));
    }
}

//! Per-node store client built on the fred crate.
//!
//! Topology surgery always targets one specific member, so every node gets
//! its own centralized client. The bulk loader is the exception: it uses a
//! clustered pool that routes each write to the owning primary.

use std::time::Duration;

use fred::prelude::*;
use fred::types::cluster::ClusterResetFlag;
use fred::types::config::ClusterDiscoveryPolicy;
use fred::types::{ClusterHash, CustomCommand};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::settings::{MigrateAuth, Settings};

/// Server-enforced timeout for one MIGRATE invocation, in milliseconds.
pub const MIGRATE_TIMEOUT_MS: u64 = 60_000;

/// Budget for the liveness probe run against every new connection.
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum ValkeyError {
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    #[error("store error: {0}")]
    Valkey(#[from] fred::error::Error),

    #[error("parse error: {0}")]
    Parse(#[from] crate::client::types::ParseError),

    #[error("timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

/// Argument form of `CLUSTER SETSLOT`.
///
/// The migrate/import states carry the peer node id, which the typed fred
/// interface does not expose, so these are issued as custom commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetSlotState {
    /// The slot is leaving this node toward the given target.
    Migrating(String),
    /// The slot is arriving on this node from the given source.
    Importing(String),
    /// The slot is owned by the given node.
    Node(String),
    /// Clear any transient marker.
    Stable,
}

/// A client bound to a single cluster member.
#[derive(Clone)]
pub struct NodeClient {
    client: Client,
    address: String,
}

impl NodeClient {
    /// Open a centralized connection to one node and verify liveness with a
    /// PING before handing the client out.
    #[instrument(skip(settings), fields(host = %host, port = %port))]
    pub async fn connect(host: &str, port: u16, settings: &Settings) -> Result<Self, ValkeyError> {
        let address = format!("{}:{}", host, port);

        let config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(host, port),
            },
            username: settings.username.clone(),
            password: settings.password.clone(),
            ..Default::default()
        };

        let command_timeout = settings.command_timeout;
        let connection_timeout = settings.connect_timeout;

        let client = Builder::from_config(config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        client.init().await.map_err(|e| ValkeyError::Connection {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(LIVENESS_TIMEOUT, client.ping::<String>(None)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(ValkeyError::Connection {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ValkeyError::Timeout {
                    operation: format!("liveness probe against {}", address),
                    duration: LIVENESS_TIMEOUT,
                });
            }
        }

        debug!(address = %address, "connected");
        Ok(Self { client, address })
    }

    /// The normalized `host:port` this client is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the underlying fred client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), ValkeyError> {
        self.client.quit().await?;
        Ok(())
    }

    /// Ping the node.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<String, ValkeyError> {
        let response: String = self.client.ping(None).await?;
        Ok(response)
    }

    /// Raw `CLUSTER INFO` payload.
    #[instrument(skip(self))]
    pub async fn cluster_info_raw(&self) -> Result<String, ValkeyError> {
        let response: String = self.client.cluster_info().await?;
        Ok(response)
    }

    /// Raw `CLUSTER NODES` payload.
    #[instrument(skip(self))]
    pub async fn cluster_nodes_raw(&self) -> Result<String, ValkeyError> {
        let response: String = self.client.cluster_nodes().await?;
        Ok(response)
    }

    /// `CLUSTER MEET`: ask this node to handshake with the given peer.
    #[instrument(skip(self))]
    pub async fn cluster_meet(&self, ip: &str, port: u16) -> Result<(), ValkeyError> {
        self.client.cluster_meet(ip, port).await?;
        Ok(())
    }

    /// `CLUSTER REPLICATE`: make this node a replica of the given primary.
    #[instrument(skip(self))]
    pub async fn cluster_replicate(&self, primary_id: &str) -> Result<(), ValkeyError> {
        self.client.cluster_replicate(primary_id).await?;
        Ok(())
    }

    /// `CLUSTER MYID`: this node's own id.
    #[instrument(skip(self))]
    pub async fn cluster_myid(&self) -> Result<String, ValkeyError> {
        let id: String = self.client.cluster_myid().await?;
        Ok(id)
    }

    /// `CLUSTER ADDSLOTS`: assign slots to this node.
    #[instrument(skip(self, slots), fields(slot_count = slots.len()))]
    pub async fn cluster_add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        self.client.cluster_add_slots(slots).await?;
        Ok(())
    }

    /// `CLUSTER FORGET`: remove a node from this member's view.
    #[instrument(skip(self))]
    pub async fn cluster_forget(&self, node_id: &str) -> Result<(), ValkeyError> {
        self.client.cluster_forget(node_id).await?;
        Ok(())
    }

    /// `CLUSTER RESET SOFT|HARD`.
    #[instrument(skip(self))]
    pub async fn cluster_reset(&self, hard: bool) -> Result<(), ValkeyError> {
        let mode = if hard {
            Some(ClusterResetFlag::Hard)
        } else {
            Some(ClusterResetFlag::Soft)
        };
        self.client.cluster_reset(mode).await?;
        Ok(())
    }

    /// `CLUSTER SETSLOT` with the peer node id attached where the protocol
    /// requires it.
    #[instrument(skip(self))]
    pub async fn cluster_setslot(&self, slot: u16, state: SetSlotState) -> Result<(), ValkeyError> {
        let args = setslot_args(slot, &state);
        let cmd = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
        let _: String = self.client.custom(cmd, args).await?;
        Ok(())
    }

    /// `CLUSTER GETKEYSINSLOT`: up to `count` keys currently in the slot.
    #[instrument(skip(self))]
    pub async fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> Result<Vec<String>, ValkeyError> {
        let keys: Vec<String> = self.client.cluster_get_keys_in_slot(slot, count).await?;
        Ok(keys)
    }

    /// `CLUSTER COUNTKEYSINSLOT`.
    #[instrument(skip(self))]
    pub async fn cluster_count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        let count: u64 = self.client.cluster_count_keys_in_slot(slot).await?;
        Ok(count)
    }

    /// Raw `CLUSTER SLOTS` reply, for coverage verification.
    #[instrument(skip(self))]
    pub async fn cluster_slots_raw(&self) -> Result<Value, ValkeyError> {
        let slots: Value = self.client.cluster_slots().await?;
        Ok(slots)
    }

    /// Server-side `MIGRATE` of one key to the given peer, with inline
    /// authentication. No COPY, no REPLACE: the target must not already hold
    /// the key.
    #[instrument(skip(self, auth), fields(key = %key))]
    pub async fn migrate_key(
        &self,
        host: &str,
        port: u16,
        key: &str,
        auth: &MigrateAuth,
    ) -> Result<(), ValkeyError> {
        let args = migrate_args(host, port, key, auth);
        let cmd = CustomCommand::new_static("MIGRATE", ClusterHash::FirstKey, false);
        let _: String = self.client.custom(cmd, args).await?;
        Ok(())
    }
}

/// Open a clustered connection pool for data-path traffic. The pool routes
/// each command to the owning primary and follows redirects.
#[instrument(skip(settings), fields(host = %host, port = %port))]
pub async fn connect_clustered_pool(
    host: &str,
    port: u16,
    settings: &Settings,
) -> Result<Pool, ValkeyError> {
    let address = format!("{}:{}", host, port);

    let config = Config {
        server: ServerConfig::Clustered {
            hosts: vec![Server::new(host, port)],
            policy: ClusterDiscoveryPolicy::ConfigEndpoint,
        },
        username: settings.username.clone(),
        password: settings.password.clone(),
        ..Default::default()
    };

    let command_timeout = settings.command_timeout;
    let connection_timeout = settings.connect_timeout;

    let pool = Builder::from_config(config)
        .with_performance_config(|perf| {
            perf.default_command_timeout = command_timeout;
        })
        .with_connection_config(|conn| {
            conn.connection_timeout = connection_timeout;
        })
        .build_pool(settings.pool_size)?;

    pool.init().await.map_err(|e| ValkeyError::Connection {
        address: address.clone(),
        reason: e.to_string(),
    })?;

    match tokio::time::timeout(LIVENESS_TIMEOUT, pool.ping::<String>(None)).await {
        Ok(Ok(_)) => Ok(pool),
        Ok(Err(e)) => Err(ValkeyError::Connection {
            address,
            reason: e.to_string(),
        }),
        Err(_) => Err(ValkeyError::Timeout {
            operation: format!("liveness probe against {}", address),
            duration: LIVENESS_TIMEOUT,
        }),
    }
}

fn setslot_args(slot: u16, state: &SetSlotState) -> Vec<String> {
    let mut args = vec!["SETSLOT".to_string(), slot.to_string()];
    match state {
        SetSlotState::Migrating(target_id) => {
            args.push("MIGRATING".to_string());
            args.push(target_id.clone());
        }
        SetSlotState::Importing(source_id) => {
            args.push("IMPORTING".to_string());
            args.push(source_id.clone());
        }
        SetSlotState::Node(owner_id) => {
            args.push("NODE".to_string());
            args.push(owner_id.clone());
        }
        SetSlotState::Stable => args.push("STABLE".to_string()),
    }
    args
}

fn migrate_args(host: &str, port: u16, key: &str, auth: &MigrateAuth) -> Vec<String> {
    let mut args = vec![
        host.to_string(),
        port.to_string(),
        key.to_string(),
        "0".to_string(),
        MIGRATE_TIMEOUT_MS.to_string(),
    ];
    match auth {
        MigrateAuth::UserPassword(user, pass) => {
            args.push("AUTH2".to_string());
            args.push(user.clone());
            args.push(pass.clone());
        }
        MigrateAuth::Password(pass) => {
            args.push("AUTH".to_string());
            args.push(pass.clone());
        }
        MigrateAuth::None => {}
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setslot_args_carry_peer_id() {
        assert_eq!(
            setslot_args(42, &SetSlotState::Migrating("tgt".to_string())),
            vec!["SETSLOT", "42", "MIGRATING", "tgt"]
        );
        assert_eq!(
            setslot_args(42, &SetSlotState::Importing("src".to_string())),
            vec!["SETSLOT", "42", "IMPORTING", "src"]
        );
        assert_eq!(
            setslot_args(42, &SetSlotState::Node("own".to_string())),
            vec!["SETSLOT", "42", "NODE", "own"]
        );
        assert_eq!(
            setslot_args(42, &SetSlotState::Stable),
            vec!["SETSLOT", "42", "STABLE"]
        );
    }

    #[test]
    fn migrate_args_auth_forms() {
        let base = migrate_args("10.0.0.2", 7002, "key:1", &MigrateAuth::None);
        assert_eq!(base, vec!["10.0.0.2", "7002", "key:1", "0", "60000"]);

        let pw = migrate_args(
            "10.0.0.2",
            7002,
            "key:1",
            &MigrateAuth::Password("pw".to_string()),
        );
        assert_eq!(&pw[5..], &["AUTH", "pw"]);

        let acl = migrate_args(
            "10.0.0.2",
            7002,
            "key:1",
            &MigrateAuth::UserPassword("admin".to_string(), "pw".to_string()),
        );
        assert_eq!(&acl[5..], &["AUTH2", "admin", "pw"]);
    }

    #[test]
    fn migrate_never_copies_or_replaces() {
        let args = migrate_args("h", 1, "k", &MigrateAuth::Password("p".to_string()));
        assert!(!args.iter().any(|a| a == "COPY" || a == "REPLACE"));
    }
}

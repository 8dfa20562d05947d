//! Store client layer for cluster administration.
//!
//! A type-safe wrapper around the `fred` client plus the parsing and
//! auditing logic for the cluster's administrative payloads.
//!
//! ## Architecture
//!
//! - `address`: node address normalization and validation
//! - `node_client`: per-node client wrapper over fred
//! - `pool`: shared address -> client map with a double-checked write path
//! - `types`: parsed `CLUSTER NODES` / `CLUSTER INFO` payloads
//! - `view`: canonical signatures and health rules over parsed views
//! - `cluster_ops`: parsed queries and stabilization/convergence waits
//! - `migrate`: the slot migration engine

pub mod address;
pub mod cluster_ops;
pub mod migrate;
pub mod node_client;
pub mod pool;
pub mod types;
pub mod view;

pub use migrate::{MigrationEndpoint, SlotMigrator};
pub use node_client::{NodeClient, SetSlotState, ValkeyError};
pub use pool::ConnectionPool;
pub use types::{ClusterInfo, ClusterNode, ClusterState, ClusterView, NodeFlags, NodeRole};
pub use view::{ClusterStatus, Finding, Severity};

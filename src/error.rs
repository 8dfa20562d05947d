//! Top-level error taxonomy for valkeyctl commands.
//!
//! Errors bubble up to the command entrypoint with context attached at each
//! wrapping layer (slot number, node id, phase). Only network and timeout
//! errors inside key migration are retried; everything else surfaces here.

use thiserror::Error;

use crate::client::address::AddressError;
use crate::client::node_client::ValkeyError;
use crate::client::types::ParseError;

/// Errors surfaced by command entrypoints.
///
/// Every variant maps to exit code 1; the variants exist so that messages
/// carry the failure category and enough context for the operator to act.
#[derive(Error, Debug)]
pub enum AdminError {
    /// Bad operator input: malformed address, duplicate node, value out of range.
    #[error("invalid input: {0}")]
    Input(String),

    /// A pre-flight validation failed before any mutation was attempted.
    #[error("preflight check failed: {0}")]
    Preflight(String),

    /// The store rejected a topology-administrative command.
    #[error("cluster command rejected: {0}")]
    Topology(String),

    /// A key migration failed after retries were exhausted.
    #[error("key migration failed (slot {slot}, key {key}): {reason}")]
    DataPath {
        slot: u16,
        key: String,
        reason: String,
    },

    /// Timed out waiting for cluster members to agree on a view.
    #[error("timed out waiting for cluster agreement: {0}")]
    Convergence(String),

    /// A completed slot move could not be published to any other member.
    #[error("ownership propagation failed for slot {slot}: {reason}")]
    Propagation { slot: u16, reason: String },

    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error(transparent)]
    Client(#[from] ValkeyError),

    #[error("malformed cluster response: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, AdminError>;

//! Parsed representations of the store's cluster-administrative output.
//!
//! These types model the text payloads of `CLUSTER NODES` and `CLUSTER INFO`
//! as seen through one cluster member. Views are derived on demand from live
//! queries and never persisted.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::client::address::{parse_address, strip_bus_port};
use crate::slots::distribution::{SlotRange, SLOT_COUNT};

/// Errors that can occur when parsing cluster payloads.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid cluster info: {0}")]
    InvalidClusterInfo(String),
    #[error("invalid cluster nodes line: {0}")]
    InvalidNodeLine(String),
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// State of the cluster as reported by `CLUSTER INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Cluster is serving requests.
    Ok,
    /// Cluster is failed. A lone node that has never joined a cluster also
    /// reports this, which is how bootstrap detects not-yet-clustered nodes.
    Fail,
}

impl FromStr for ClusterState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ok" => Ok(ClusterState::Ok),
            "fail" => Ok(ClusterState::Fail),
            other => Err(ParseError::InvalidClusterInfo(format!(
                "unknown cluster state: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Ok => write!(f, "ok"),
            ClusterState::Fail => write!(f, "fail"),
        }
    }
}

/// Parsed output of `CLUSTER INFO`.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub state: ClusterState,
    pub slots_assigned: u32,
    pub known_nodes: u32,
    pub cluster_size: u32,
    pub current_epoch: i64,
    pub my_epoch: i64,
    /// Every raw key/value pair, for callers that need less common fields.
    pub raw: HashMap<String, String>,
}

impl ClusterInfo {
    /// Parse the `key:value` lines of `CLUSTER INFO`. Only `cluster_state`
    /// is required; counters default to zero when absent.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let mut raw = HashMap::new();
        for line in payload.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                raw.insert(key.to_string(), value.trim().to_string());
            }
        }

        let state = raw
            .get("cluster_state")
            .ok_or_else(|| ParseError::MissingField("cluster_state".to_string()))?
            .parse()?;

        let get_u32 = |key: &str| raw.get(key).and_then(|v| v.parse().ok()).unwrap_or(0u32);
        let get_i64 = |key: &str| raw.get(key).and_then(|v| v.parse().ok()).unwrap_or(0i64);

        Ok(ClusterInfo {
            state,
            slots_assigned: get_u32("cluster_slots_assigned"),
            known_nodes: get_u32("cluster_known_nodes"),
            cluster_size: get_u32("cluster_size"),
            current_epoch: get_i64("cluster_current_epoch"),
            my_epoch: get_i64("cluster_my_epoch"),
            raw,
        })
    }

    pub fn all_slots_assigned(&self) -> bool {
        self.slots_assigned == u32::from(SLOT_COUNT)
    }
}

/// Flags attached to one node line in `CLUSTER NODES`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub myself: bool,
    pub primary: bool,
    pub replica: bool,
    pub fail: bool,
    pub handshake: bool,
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse the comma-separated flag field. The store still spells the
    /// roles `master` and `slave` on the wire.
    pub fn parse(field: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in field.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.primary = true,
                "slave" => flags.replica = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }

    /// Render the flags that are stable across views, sorted, for use in
    /// convergence signatures. `myself` and `handshake` are per-observer
    /// noise and are dropped.
    pub fn canonical(&self) -> String {
        let mut parts = Vec::new();
        if self.fail {
            parts.push("fail");
        }
        if self.primary {
            parts.push("master");
        }
        if self.noaddr {
            parts.push("noaddr");
        }
        if self.replica {
            parts.push("slave");
        }
        parts.join(",")
    }
}

/// Role of a node, decided by priority: an advertised primary id wins, then
/// slot ownership, then the role flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
    Unknown,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
            NodeRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// One node record as reported by `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Opaque 40-character node id.
    pub id: String,
    /// `host:port` with the cluster-bus suffix stripped. May be malformed
    /// for nodes the cluster has lost track of; see `endpoint`.
    pub address: String,
    /// Parsed host/port when the advertised address is well-formed.
    pub endpoint: Option<(String, u16)>,
    pub flags: NodeFlags,
    /// Primary followed by this replica, when advertised.
    pub primary_id: Option<String>,
    pub ping_sent: i64,
    pub pong_recv: i64,
    pub config_epoch: i64,
    /// `connected` or `disconnected`.
    pub link_state: String,
    /// Owned slots as inclusive ranges. Transient migrate/import markers are
    /// excluded from ownership but counted in `transient_slots`.
    pub slots: Vec<SlotRange>,
    /// Number of `[n->-id]` / `[<-n-id]` markers seen on this line.
    pub transient_slots: usize,
}

impl ClusterNode {
    /// Parse one line of `CLUSTER NODES` output.
    ///
    /// Fields: id, address@bus, flags, primary-id-or-dash, ping-sent,
    /// pong-recv, config-epoch, link-state, then slot tokens.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(ParseError::InvalidNodeLine(format!(
                "expected at least 8 fields, got {}: {}",
                parts.len(),
                line
            )));
        }

        let address = strip_bus_port(parts[1]).to_string();
        let endpoint = parse_address(&address).ok();

        let flags = NodeFlags::parse(parts[2]);
        let primary_id = match parts[3] {
            "-" => None,
            id => Some(id.to_string()),
        };

        let ping_sent = parts[4].parse().unwrap_or(0);
        let pong_recv = parts[5].parse().unwrap_or(0);
        let config_epoch = parts[6].parse().unwrap_or(0);
        let link_state = parts[7].to_string();

        let mut slots = Vec::new();
        let mut transient_slots = 0;
        for token in &parts[8..] {
            match parse_slot_token(token) {
                Some(SlotToken::Owned(range)) => slots.push(range),
                Some(SlotToken::Transient) => transient_slots += 1,
                None => {}
            }
        }

        Ok(ClusterNode {
            id: parts[0].to_string(),
            address,
            endpoint,
            flags,
            primary_id,
            ping_sent,
            pong_recv,
            config_epoch,
            link_state,
            slots,
            transient_slots,
        })
    }

    /// Role by priority: `primary_id` present means replica regardless of
    /// flag ordering; otherwise owning slots means primary; otherwise fall
    /// back to the flags.
    pub fn role(&self) -> NodeRole {
        if self.primary_id.is_some() {
            return NodeRole::Replica;
        }
        if !self.slots.is_empty() {
            return NodeRole::Primary;
        }
        if self.flags.primary {
            NodeRole::Primary
        } else if self.flags.replica {
            NodeRole::Replica
        } else {
            NodeRole::Unknown
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role() == NodeRole::Primary
    }

    pub fn is_replica(&self) -> bool {
        self.role() == NodeRole::Replica
    }

    pub fn is_connected(&self) -> bool {
        self.link_state == "connected"
    }

    /// Total number of slots this node owns.
    pub fn slot_count(&self) -> u32 {
        self.slots.iter().map(|r| r.width()).sum()
    }

    /// Owned slots expanded to individual numbers, ascending.
    pub fn owned_slots(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self.slots.iter().flat_map(|r| r.iter()).collect();
        slots.sort_unstable();
        slots
    }

    /// Whether the advertised address is unusable (lost or zero port).
    pub fn has_malformed_address(&self) -> bool {
        self.endpoint.is_none()
    }
}

enum SlotToken {
    Owned(SlotRange),
    Transient,
}

fn parse_slot_token(token: &str) -> Option<SlotToken> {
    if token.starts_with('[') {
        // Migrate/import markers carry no ownership.
        return Some(SlotToken::Transient);
    }
    if let Some((start, end)) = token.split_once('-') {
        let start: u16 = start.parse().ok()?;
        let end: u16 = end.parse().ok()?;
        if start <= end && end < SLOT_COUNT {
            return Some(SlotToken::Owned(SlotRange::new(start, end)));
        }
        return None;
    }
    let slot: u16 = token.parse().ok()?;
    if slot < SLOT_COUNT {
        return Some(SlotToken::Owned(SlotRange::from(slot)));
    }
    None
}

/// The set of node records reported by one cluster member.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub nodes: Vec<ClusterNode>,
    /// Lines that did not parse and were dropped.
    pub malformed_lines: usize,
}

impl ClusterView {
    /// Parse the full `CLUSTER NODES` payload. Malformed lines are counted
    /// and dropped rather than failing the whole view.
    pub fn parse(payload: &str) -> Self {
        let mut nodes = Vec::new();
        let mut malformed_lines = 0;
        for line in payload.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match ClusterNode::parse_line(line) {
                Ok(node) => nodes.push(node),
                Err(_) => malformed_lines += 1,
            }
        }
        ClusterView {
            nodes,
            malformed_lines,
        }
    }

    pub fn primaries(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_primary()).collect()
    }

    pub fn replicas(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_replica()).collect()
    }

    pub fn get(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn find_by_address(&self, address: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn replicas_of(&self, primary_id: &str) -> Vec<&ClusterNode> {
        self.nodes
            .iter()
            .filter(|n| n.primary_id.as_deref() == Some(primary_id))
            .collect()
    }

    /// Per-slot coverage bitmap across all nodes.
    pub fn covered_slots(&self) -> Vec<bool> {
        let mut covered = vec![false; usize::from(SLOT_COUNT)];
        for node in &self.nodes {
            for range in &node.slots {
                for slot in range.iter() {
                    covered[usize::from(slot)] = true;
                }
            }
        }
        covered
    }

    /// Number of distinct slots owned by some node.
    pub fn covered_slot_count(&self) -> u32 {
        self.covered_slots().iter().filter(|c| **c).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY_LINE: &str = "07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:7001@17001 myself,master - 0 1426238317239 2 connected 0-5460";
    const REPLICA_LINE: &str = "e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:7004@17004 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 1426238316232 2 connected";

    #[test]
    fn parse_cluster_info() {
        let payload = "cluster_state:ok\ncluster_slots_assigned:16384\ncluster_known_nodes:6\ncluster_size:3\ncluster_current_epoch:6\ncluster_my_epoch:2\n";
        let info = ClusterInfo::parse(payload).unwrap();
        assert_eq!(info.state, ClusterState::Ok);
        assert_eq!(info.slots_assigned, 16384);
        assert_eq!(info.known_nodes, 6);
        assert_eq!(info.cluster_size, 3);
        assert_eq!(info.current_epoch, 6);
        assert!(info.all_slots_assigned());
    }

    #[test]
    fn parse_cluster_info_requires_state() {
        assert!(ClusterInfo::parse("cluster_size:3\n").is_err());
    }

    #[test]
    fn parse_cluster_info_fail_state() {
        let info = ClusterInfo::parse("cluster_state:fail\ncluster_slots_assigned:0\n").unwrap();
        assert_eq!(info.state, ClusterState::Fail);
        assert!(!info.all_slots_assigned());
    }

    #[test]
    fn parse_primary_line() {
        let node = ClusterNode::parse_line(PRIMARY_LINE).unwrap();
        assert_eq!(node.id, "07c37dfeb235213a872192d90877d0cd55635b91");
        assert_eq!(node.address, "127.0.0.1:7001");
        assert_eq!(node.endpoint, Some(("127.0.0.1".to_string(), 7001)));
        assert!(node.flags.myself);
        assert!(node.flags.primary);
        assert_eq!(node.role(), NodeRole::Primary);
        assert_eq!(node.slot_count(), 5461);
        assert!(node.is_connected());
        assert_eq!(node.config_epoch, 2);
    }

    #[test]
    fn parse_replica_line() {
        let node = ClusterNode::parse_line(REPLICA_LINE).unwrap();
        assert_eq!(node.role(), NodeRole::Replica);
        assert_eq!(
            node.primary_id.as_deref(),
            Some("07c37dfeb235213a872192d90877d0cd55635b91")
        );
        assert!(node.slots.is_empty());
    }

    #[test]
    fn role_priority_ignores_flag_order() {
        // The primary-id field decides the role even when flags disagree.
        let line = "aaaa 127.0.0.1:7002@17002 master bbbb 0 0 1 connected";
        let node = ClusterNode::parse_line(line).unwrap();
        assert_eq!(node.role(), NodeRole::Replica);
    }

    #[test]
    fn role_from_slots_without_flags() {
        let line = "aaaa 127.0.0.1:7002@17002 noflags - 0 0 1 connected 100-200";
        let node = ClusterNode::parse_line(line).unwrap();
        assert_eq!(node.role(), NodeRole::Primary);
    }

    #[test]
    fn transient_markers_are_not_ownership() {
        let line =
            "aaaa 127.0.0.1:7002@17002 master - 0 0 1 connected 0-99 [100->-bbbb] [<-101-cccc]";
        let node = ClusterNode::parse_line(line).unwrap();
        assert_eq!(node.slot_count(), 100);
        assert_eq!(node.transient_slots, 2);
    }

    #[test]
    fn out_of_range_slot_tokens_dropped() {
        let line = "aaaa 127.0.0.1:7002@17002 master - 0 0 1 connected 16384 20000-20001 5-2";
        let node = ClusterNode::parse_line(line).unwrap();
        assert!(node.slots.is_empty());
    }

    #[test]
    fn short_line_is_rejected() {
        assert!(ClusterNode::parse_line("aaaa 127.0.0.1:7002 master").is_err());
    }

    #[test]
    fn malformed_address_detected() {
        let line = "aaaa :0@0 master,noaddr - 0 0 1 disconnected";
        let node = ClusterNode::parse_line(line).unwrap();
        assert!(node.has_malformed_address());
    }

    #[test]
    fn view_counts_malformed_lines() {
        let payload = format!("{}\ngarbage line\n{}\n", PRIMARY_LINE, REPLICA_LINE);
        let view = ClusterView::parse(&payload);
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.malformed_lines, 1);
        assert_eq!(view.primaries().len(), 1);
        assert_eq!(view.replicas().len(), 1);
        assert_eq!(view.covered_slot_count(), 5461);
    }

    #[test]
    fn view_lookup_helpers() {
        let payload = format!("{}\n{}\n", PRIMARY_LINE, REPLICA_LINE);
        let view = ClusterView::parse(&payload);
        let primary_id = "07c37dfeb235213a872192d90877d0cd55635b91";
        assert!(view.get(primary_id).is_some());
        assert!(view.find_by_address("127.0.0.1:7004").is_some());
        assert_eq!(view.replicas_of(primary_id).len(), 1);
    }

    #[test]
    fn canonical_flags_sorted_and_stripped() {
        let flags = NodeFlags::parse("myself,master,handshake");
        assert_eq!(flags.canonical(), "master");
        let flags = NodeFlags::parse("slave,fail");
        assert_eq!(flags.canonical(), "fail,slave");
    }
}

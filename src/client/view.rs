//! View canonicalization and health auditing.
//!
//! Pure logic over parsed cluster views: canonical signatures used to detect
//! convergence and divergence, the health rules applied by `check`, and the
//! sampling grid for estimated key counts. All I/O stays in the commands.

use crate::client::types::{ClusterState, ClusterView};
use crate::slots::distribution::SLOT_COUNT;

/// Number of evenly spaced slots sampled for the estimated key count.
pub const KEY_SAMPLE_POINTS: u16 = 20;

/// Severity of one health finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One health finding produced by the inspector.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Disposition of the cluster-state `fail` re-query that `check` performs
/// two seconds after first observing the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailRequery {
    /// The initial query did not report `fail`.
    NotFail,
    /// `fail` was observed but the re-query came back `ok`.
    Recovered,
    /// `fail` persisted across the re-query.
    Persisted,
}

/// Everything `check` collects about a cluster before auditing it.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub view: ClusterView,
    pub state: ClusterState,
    pub covered_slots: u32,
    pub known_nodes: u32,
    pub cluster_size: u32,
    pub current_epoch: i64,
    /// Estimated or precise key count, when collected.
    pub total_keys: Option<u64>,
    /// Whether `total_keys` came from counting every slot.
    pub precise_keys: bool,
}

impl ClusterStatus {
    pub fn failed_node_count(&self) -> usize {
        self.view.nodes.iter().filter(|n| n.flags.fail).count()
    }

    /// Healthy apart from the state flag itself: full coverage and no
    /// failed nodes.
    pub fn healthy_apart_from_state(&self) -> bool {
        self.covered_slots == u32::from(SLOT_COUNT) && self.failed_node_count() == 0
    }
}

/// Signature of a view for convergence comparison: sorted
/// `node_id:canonical_flags` pairs. `myself` and `handshake` are stripped
/// by the canonical flag rendering since they differ per observer.
pub fn convergence_signature(view: &ClusterView) -> String {
    let mut parts: Vec<String> = view
        .nodes
        .iter()
        .map(|n| format!("{}:{}", n.id, n.flags.canonical()))
        .collect();
    parts.sort();
    parts.join("|")
}

/// Full canonical form of a view for the consistency check: per node, the
/// stable fields only (id, stripped address, canonical flags, primary id,
/// slot ranges), with lines sorted.
pub fn canonical_view(view: &ClusterView) -> String {
    let mut lines: Vec<String> = view
        .nodes
        .iter()
        .map(|n| {
            let slots: Vec<String> = n.slots.iter().map(|r| r.to_string()).collect();
            format!(
                "{} {} {} {} {}",
                n.id,
                n.address,
                n.flags.canonical(),
                n.primary_id.as_deref().unwrap_or("-"),
                slots.join(" ")
            )
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

/// The slots sampled for the estimated key count: `KEY_SAMPLE_POINTS`
/// evenly spaced points across the keyspace.
pub fn sample_slots() -> Vec<u16> {
    (0..KEY_SAMPLE_POINTS)
        .map(|i| ((u32::from(SLOT_COUNT) * u32::from(i)) / u32::from(KEY_SAMPLE_POINTS)) as u16)
        .collect()
}

/// Scale a sampled key count to the full keyspace.
pub fn estimate_from_samples(sampled: u64, valid_samples: u32) -> u64 {
    if valid_samples == 0 {
        return 0;
    }
    let avg = sampled as f64 / f64::from(valid_samples);
    (avg * f64::from(SLOT_COUNT)) as u64
}

/// Apply the health rules to a collected status. Each rule that fires
/// yields exactly one finding.
pub fn health_findings(status: &ClusterStatus, fail_requery: FailRequery) -> Vec<Finding> {
    let mut findings = Vec::new();

    if status.covered_slots != u32::from(SLOT_COUNT) {
        findings.push(Finding::warning(format!(
            "incomplete slot coverage: {}/{} slots owned",
            status.covered_slots, SLOT_COUNT
        )));
    }

    let failed = status.failed_node_count();
    if failed > 0 {
        findings.push(Finding::warning(format!("{} failed node(s) present", failed)));
    }

    if status.state == ClusterState::Fail {
        match fail_requery {
            FailRequery::Recovered => findings.push(Finding::info(
                "cluster state 'fail' was transient (recovered on re-query)",
            )),
            FailRequery::Persisted if status.healthy_apart_from_state() => {
                findings.push(Finding::warning(
                    "cluster state 'fail' persists despite full coverage; transient state suspected, re-run check",
                ));
            }
            _ => findings.push(Finding::warning(
                "cluster state 'fail' (slot coverage or node failures present)",
            )),
        }
    }

    let primaries = status.view.primaries();
    let bare_primaries = primaries
        .iter()
        .filter(|p| !p.flags.fail)
        .filter(|p| {
            !status
                .view
                .replicas_of(&p.id)
                .iter()
                .any(|r| !r.flags.fail)
        })
        .count();
    if bare_primaries > 0 {
        findings.push(Finding::warning(format!(
            "{} primary(ies) without a live replica",
            bare_primaries
        )));
    }

    let live_counts: Vec<u32> = primaries
        .iter()
        .filter(|p| !p.flags.fail)
        .map(|p| p.slot_count())
        .collect();
    if live_counts.len() > 1 {
        let min = *live_counts.iter().min().unwrap_or(&0);
        let max = *live_counts.iter().max().unwrap_or(&0);
        let ideal = u32::from(SLOT_COUNT) / live_counts.len() as u32;
        let threshold = (ideal / 5).max(1000);
        if max - min > threshold {
            findings.push(Finding::warning(format!(
                "slot distribution imbalance: min {} / max {} slots per primary",
                min, max
            )));
        }
    }

    let handshaking = status
        .view
        .nodes
        .iter()
        .filter(|n| n.flags.handshake)
        .count();
    if handshaking > 0 {
        findings.push(Finding::warning(format!(
            "{} node(s) still in handshake state",
            handshaking
        )));
    }

    let malformed = status
        .view
        .nodes
        .iter()
        .filter(|n| n.has_malformed_address())
        .count();
    if malformed > 0 {
        findings.push(Finding::warning(format!(
            "{} node(s) advertise a malformed address",
            malformed
        )));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::ClusterView;

    fn id(n: usize) -> String {
        format!("{:040x}", n)
    }

    fn primary_line(n: usize, slots: &str, extra_flags: &str) -> String {
        let flags = if extra_flags.is_empty() {
            "master".to_string()
        } else {
            format!("master,{}", extra_flags)
        };
        format!(
            "{} 127.0.0.1:{}@1{} {} - 0 0 {} connected {}",
            id(n),
            7000 + n,
            7000 + n,
            flags,
            n,
            slots
        )
    }

    fn replica_line(n: usize, primary: usize, extra_flags: &str) -> String {
        let flags = if extra_flags.is_empty() {
            "slave".to_string()
        } else {
            format!("slave,{}", extra_flags)
        };
        format!(
            "{} 127.0.0.1:{}@1{} {} {} 0 0 {} connected",
            id(n),
            7000 + n,
            7000 + n,
            flags,
            id(primary),
            n
        )
    }

    fn healthy_status() -> ClusterStatus {
        let payload = [
            primary_line(1, "0-5461", ""),
            primary_line(2, "5462-10922", ""),
            primary_line(3, "10923-16383", ""),
            replica_line(4, 1, ""),
            replica_line(5, 2, ""),
            replica_line(6, 3, ""),
        ]
        .join("\n");
        let view = ClusterView::parse(&payload);
        let covered = view.covered_slot_count();
        ClusterStatus {
            view,
            state: ClusterState::Ok,
            covered_slots: covered,
            known_nodes: 6,
            cluster_size: 3,
            current_epoch: 6,
            total_keys: None,
            precise_keys: false,
        }
    }

    #[test]
    fn healthy_cluster_has_no_findings() {
        let status = healthy_status();
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings.is_empty(), "unexpected findings: {:?}", findings);
    }

    #[test]
    fn incomplete_coverage_is_flagged() {
        let mut status = healthy_status();
        status.covered_slots = 16000;
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings.iter().any(|f| f.message.contains("16000/16384")));
    }

    #[test]
    fn failed_nodes_are_flagged() {
        let payload = [
            primary_line(1, "0-16383", "fail"),
            primary_line(2, "", ""),
        ]
        .join("\n");
        let view = ClusterView::parse(&payload);
        let mut status = healthy_status();
        status.view = view;
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings.iter().any(|f| f.message.contains("failed node")));
    }

    #[test]
    fn transient_fail_recovered_is_info() {
        let mut status = healthy_status();
        status.state = ClusterState::Fail;
        let findings = health_findings(&status, FailRequery::Recovered);
        let state_finding = findings
            .iter()
            .find(|f| f.message.contains("transient"))
            .expect("state finding");
        assert_eq!(state_finding.severity, Severity::Info);
    }

    #[test]
    fn persistent_fail_is_warning() {
        let mut status = healthy_status();
        status.state = ClusterState::Fail;
        let findings = health_findings(&status, FailRequery::Persisted);
        let state_finding = findings
            .iter()
            .find(|f| f.message.contains("persists"))
            .expect("state finding");
        assert_eq!(state_finding.severity, Severity::Warning);
    }

    #[test]
    fn bare_primary_is_flagged() {
        let payload = [
            primary_line(1, "0-5461", ""),
            primary_line(2, "5462-10922", ""),
            primary_line(3, "10923-16383", ""),
            replica_line(4, 1, ""),
        ]
        .join("\n");
        let view = ClusterView::parse(&payload);
        let mut status = healthy_status();
        status.view = view;
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings
            .iter()
            .any(|f| f.message.contains("2 primary(ies) without a live replica")));
    }

    #[test]
    fn imbalance_uses_absolute_floor() {
        // 3 primaries, ideal 5461, threshold max(1092, 1000) = 1092.
        let payload = [
            primary_line(1, "0-6999", ""),
            primary_line(2, "7000-11999", ""),
            primary_line(3, "12000-16383", ""),
        ]
        .join("\n");
        let view = ClusterView::parse(&payload);
        let mut status = healthy_status();
        status.view = view;
        // max 7000, min 4384 -> spread 2616 > 1092.
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings.iter().any(|f| f.message.contains("imbalance")));
    }

    #[test]
    fn handshake_nodes_are_flagged() {
        let payload = [
            primary_line(1, "0-16383", ""),
            primary_line(2, "", "handshake"),
        ]
        .join("\n");
        let view = ClusterView::parse(&payload);
        let mut status = healthy_status();
        status.view = view;
        let findings = health_findings(&status, FailRequery::NotFail);
        assert!(findings.iter().any(|f| f.message.contains("handshake")));
    }

    #[test]
    fn convergence_signature_ignores_observer_flags() {
        let a = ClusterView::parse(&[
            primary_line(1, "0-16383", "myself"),
            replica_line(2, 1, ""),
        ]
        .join("\n"));
        let b = ClusterView::parse(&[
            primary_line(1, "0-16383", ""),
            replica_line(2, 1, "myself"),
        ]
        .join("\n"));
        assert_eq!(convergence_signature(&a), convergence_signature(&b));
    }

    #[test]
    fn convergence_signature_detects_membership_difference() {
        let a = ClusterView::parse(&primary_line(1, "0-16383", ""));
        let b = ClusterView::parse(&[
            primary_line(1, "0-16383", ""),
            replica_line(2, 1, ""),
        ]
        .join("\n"));
        assert_ne!(convergence_signature(&a), convergence_signature(&b));
    }

    #[test]
    fn canonical_view_is_order_independent() {
        let forward = [primary_line(1, "0-16383", ""), replica_line(2, 1, "")].join("\n");
        let backward = [replica_line(2, 1, ""), primary_line(1, "0-16383", "myself")].join("\n");
        assert_eq!(
            canonical_view(&ClusterView::parse(&forward)),
            canonical_view(&ClusterView::parse(&backward))
        );
    }

    #[test]
    fn sample_grid_is_even_and_in_range() {
        let slots = sample_slots();
        assert_eq!(slots.len(), 20);
        assert_eq!(slots[0], 0);
        assert!(slots.iter().all(|s| *s < SLOT_COUNT));
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn estimate_scales_average() {
        // 20 samples totalling 200 keys -> 10 per slot -> 163840 total.
        assert_eq!(estimate_from_samples(200, 20), 163840);
        assert_eq!(estimate_from_samples(0, 20), 0);
        assert_eq!(estimate_from_samples(100, 0), 0);
    }
}

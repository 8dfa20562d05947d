//! Rebalance planning - computes what needs to move, no I/O.
//!
//! Given the current per-primary slot counts, the planner pairs overloaded
//! primaries (donors) with underloaded ones (receivers) and produces a
//! minimum-movement plan toward the ideal even distribution.

use crate::slots::distribution::SLOT_COUNT;

/// Slot load of one primary, as observed in the cluster view.
#[derive(Debug, Clone)]
pub struct PrimaryLoad {
    /// Node id of the primary.
    pub id: String,
    /// Client address, for display.
    pub address: String,
    /// Owned slots, ascending. The tail of this list is donated first.
    pub slots: Vec<u16>,
}

impl PrimaryLoad {
    pub fn new(id: impl Into<String>, address: impl Into<String>, slots: Vec<u16>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            slots,
        }
    }
}

/// One step of a rebalance plan: move `slots` from one primary to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub from_id: String,
    pub to_id: String,
    pub slots: Vec<u16>,
}

impl PlanStep {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Ideal slots per primary: `16384 / n`, integer division.
pub fn ideal_slot_count(primary_count: usize) -> usize {
    if primary_count == 0 {
        return 0;
    }
    usize::from(SLOT_COUNT) / primary_count
}

/// Imbalance percentage: `100 * max|ci - I| / I`.
pub fn imbalance_percent(primaries: &[PrimaryLoad]) -> f64 {
    if primaries.is_empty() {
        return 0.0;
    }
    let ideal = ideal_slot_count(primaries.len());
    if ideal == 0 {
        return 0.0;
    }
    let max_deviation = primaries
        .iter()
        .map(|p| p.slots.len().abs_diff(ideal))
        .max()
        .unwrap_or(0);
    max_deviation as f64 / ideal as f64 * 100.0
}

/// Build a rebalance plan toward the even distribution.
///
/// Repeatedly pairs the donor with the most slots against the receiver with
/// the fewest, moving `min(donor excess, receiver deficit)` slots taken from
/// the tail of the donor's list (later slots are likelier cold), until no
/// donor/receiver pair remains. Returns an empty plan for an already
/// balanced cluster.
pub fn build_plan(primaries: &[PrimaryLoad]) -> Vec<PlanStep> {
    if primaries.len() < 2 {
        return Vec::new();
    }

    let ideal = ideal_slot_count(primaries.len());
    let mut working: Vec<PrimaryLoad> = primaries.to_vec();
    let mut plan: Vec<PlanStep> = Vec::new();

    loop {
        let donor_idx = match working
            .iter()
            .enumerate()
            .filter(|(_, p)| p.slots.len() > ideal)
            .max_by_key(|(_, p)| p.slots.len())
        {
            Some((idx, _)) => idx,
            None => break,
        };
        let receiver_idx = match working
            .iter()
            .enumerate()
            .filter(|(_, p)| p.slots.len() < ideal)
            .min_by_key(|(_, p)| p.slots.len())
        {
            Some((idx, _)) => idx,
            None => break,
        };

        let excess = working[donor_idx].slots.len() - ideal;
        let deficit = ideal - working[receiver_idx].slots.len();
        let to_move = excess.min(deficit);
        if to_move == 0 {
            break;
        }

        let donor = &mut working[donor_idx];
        let tail = donor.slots.split_off(donor.slots.len() - to_move);

        working[receiver_idx].slots.extend(tail.iter().copied());
        plan.push(PlanStep {
            from_id: working[donor_idx].id.clone(),
            to_id: working[receiver_idx].id.clone(),
            slots: tail,
        });
    }

    plan
}

/// Total number of slots a plan moves.
pub fn total_planned_slots(plan: &[PlanStep]) -> usize {
    plan.iter().map(PlanStep::slot_count).sum()
}

/// Apply a plan to a distribution, returning the post-plan loads. Used by
/// the dry-run report and by tests to verify monotone improvement.
pub fn apply_plan(primaries: &[PrimaryLoad], plan: &[PlanStep]) -> Vec<PrimaryLoad> {
    let mut result: Vec<PrimaryLoad> = primaries.to_vec();
    for step in plan {
        if let Some(donor) = result.iter_mut().find(|p| p.id == step.from_id) {
            donor.slots.retain(|s| !step.slots.contains(s));
        }
        if let Some(receiver) = result.iter_mut().find(|p| p.id == step.to_id) {
            receiver.slots.extend(step.slots.iter().copied());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(id: &str, slots: Vec<u16>) -> PrimaryLoad {
        PrimaryLoad::new(id, format!("127.0.0.1:{}", id.len() + 7000), slots)
    }

    fn loads_from_counts(counts: &[usize]) -> Vec<PrimaryLoad> {
        let mut next: u32 = 0;
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let slots: Vec<u16> = (next..next + count as u32).map(|s| s as u16).collect();
                next += count as u32;
                load(&format!("node-{}", i), slots)
            })
            .collect()
    }

    #[test]
    fn ideal_count() {
        assert_eq!(ideal_slot_count(3), 5461);
        assert_eq!(ideal_slot_count(4), 4096);
        assert_eq!(ideal_slot_count(0), 0);
    }

    #[test]
    fn imbalance_of_even_distribution_is_small() {
        let primaries = loads_from_counts(&[5462, 5461, 5461]);
        assert!(imbalance_percent(&primaries) < 0.1);
    }

    #[test]
    fn imbalance_detects_skew() {
        // One primary with everything: deviation = 16384 - 4096.
        let primaries = loads_from_counts(&[16384, 0, 0, 0]);
        let imbalance = imbalance_percent(&primaries);
        assert!(imbalance > 299.0 && imbalance < 301.0);
    }

    #[test]
    fn balanced_cluster_yields_empty_plan() {
        let primaries = loads_from_counts(&[5462, 5461, 5461]);
        assert!(build_plan(&primaries).is_empty());
    }

    #[test]
    fn plan_moves_from_tail_of_donor() {
        let primaries = loads_from_counts(&[16384, 0, 0, 0]);
        let plan = build_plan(&primaries);
        assert!(!plan.is_empty());
        // The first step donates the numerically last slots.
        let first = &plan[0];
        assert_eq!(first.from_id, "node-0");
        assert!(first.slots.contains(&16383));
    }

    #[test]
    fn plan_improves_imbalance_monotonically() {
        for counts in [
            vec![16384usize, 0, 0, 0],
            vec![5462, 5461, 5461, 0],
            vec![8000, 8384, 0],
            vec![4096, 4096, 4096, 4096],
        ] {
            let primaries = loads_from_counts(&counts);
            let before = imbalance_percent(&primaries);
            let plan = build_plan(&primaries);
            let after_loads = apply_plan(&primaries, &plan);
            let after = imbalance_percent(&after_loads);
            assert!(
                after <= before,
                "counts {:?}: imbalance {} -> {}",
                counts,
                before,
                after
            );
        }
    }

    #[test]
    fn plan_total_bounded_by_total_excess() {
        let counts = vec![9000usize, 5000, 2384, 0];
        let primaries = loads_from_counts(&counts);
        let ideal = ideal_slot_count(primaries.len());
        let total_excess: usize = counts.iter().map(|c| c.saturating_sub(ideal)).sum();
        let plan = build_plan(&primaries);
        assert!(total_planned_slots(&plan) <= total_excess);
    }

    #[test]
    fn plan_leaves_no_receiver_below_ideal_when_possible() {
        let primaries = loads_from_counts(&[12288, 4096, 0, 0]);
        let plan = build_plan(&primaries);
        let after = apply_plan(&primaries, &plan);
        let ideal = ideal_slot_count(after.len());
        for p in &after {
            assert!(
                p.slots.len() >= ideal || p.slots.len() + 1 >= ideal,
                "{} ended with {} slots (ideal {})",
                p.id,
                p.slots.len(),
                ideal
            );
        }
    }

    #[test]
    fn single_primary_never_plans() {
        let primaries = loads_from_counts(&[16384]);
        assert!(build_plan(&primaries).is_empty());
    }
}

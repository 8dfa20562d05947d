//! Slot migration state machine.
//!
//! Models the slot migration protocol for one slot moving from a source
//! primary to a target primary:
//! 1. `SETSLOT MIGRATING` on the source
//! 2. `SETSLOT IMPORTING` on the target
//! 3. `MIGRATE` key batches until the source reports the slot empty
//! 4. `SETSLOT NODE` on source, target, then every other member
//!
//! The state machine tracks progress for reporting and failure handling;
//! the driving I/O lives in [`crate::client::migrate`].

/// State of a single slot migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationState {
    /// Migration not started; the slot is stable on the source.
    #[default]
    Pending,
    /// Source accepted `SETSLOT MIGRATING`.
    Migrating,
    /// Target accepted `SETSLOT IMPORTING`; keys are draining.
    Transferring {
        /// Keys moved so far.
        moved: u64,
    },
    /// The source reports zero keys remaining in the slot.
    Drained,
    /// Ownership assigned on source and target and propagated.
    Complete,
    /// Migration failed; the slot stays with the source.
    Failed {
        /// Error description.
        error: String,
    },
}

impl MigrationState {
    /// Check if this state indicates the migration is done.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Complete | MigrationState::Failed { .. }
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, MigrationState::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationState::Failed { .. })
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::Migrating => write!(f, "migrating"),
            MigrationState::Transferring { moved } => write!(f, "transferring ({} keys)", moved),
            MigrationState::Drained => write!(f, "drained"),
            MigrationState::Complete => write!(f, "complete"),
            MigrationState::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Tracks the state of one slot migration.
#[derive(Debug, Clone)]
pub struct SlotMigrationTracker {
    /// The slot being migrated.
    pub slot: u16,
    /// Source primary node id.
    pub source: String,
    /// Target primary node id.
    pub target: String,
    /// Current state of the migration.
    pub state: MigrationState,
    /// Total keys migrated so far.
    pub keys_moved: u64,
}

impl SlotMigrationTracker {
    pub fn new(slot: u16, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            slot,
            source: source.into(),
            target: target.into(),
            state: MigrationState::Pending,
            keys_moved: 0,
        }
    }

    /// Transition to the next state.
    pub fn advance(&mut self, next: MigrationState) {
        self.state = next;
    }

    /// Record a batch of keys as migrated.
    pub fn record_keys_moved(&mut self, count: u64) {
        self.keys_moved += count;
        self.state = MigrationState::Transferring {
            moved: self.keys_moved,
        };
    }

    /// Mark as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = MigrationState::Failed {
            error: error.into(),
        };
    }

    pub fn complete(&mut self) {
        self.state = MigrationState::Complete;
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Partial-progress report for a batch of slot moves that aborted.
///
/// Slots moved earlier in the batch stay with the target; the failed slot
/// remains with the source with no residual migrate/import marker. No
/// automatic rollback is attempted; the operator reconciles by re-running
/// the move in the opposite direction or inspecting with `check`.
#[derive(Debug)]
pub struct MigrationFailure {
    /// Slots fully moved and propagated before the failure.
    pub moved: Vec<u16>,
    /// The slot whose migration aborted.
    pub failed_at: u16,
    /// Why it aborted.
    pub reason: String,
}

impl std::fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "moved {} slot(s), failed at slot {}: {}",
            self.moved.len(),
            self.failed_at,
            self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_pending() {
        assert_eq!(MigrationState::default(), MigrationState::Pending);
    }

    #[test]
    fn terminal_states() {
        assert!(!MigrationState::Pending.is_terminal());
        assert!(!MigrationState::Migrating.is_terminal());
        assert!(!MigrationState::Transferring { moved: 10 }.is_terminal());
        assert!(!MigrationState::Drained.is_terminal());
        assert!(MigrationState::Complete.is_terminal());
        assert!(MigrationState::Failed {
            error: "x".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", MigrationState::Pending), "pending");
        assert_eq!(
            format!("{}", MigrationState::Transferring { moved: 50 }),
            "transferring (50 keys)"
        );
        assert_eq!(
            format!(
                "{}",
                MigrationState::Failed {
                    error: "connection lost".to_string()
                }
            ),
            "failed: connection lost"
        );
    }

    #[test]
    fn tracker_walks_the_protocol() {
        let mut tracker = SlotMigrationTracker::new(100, "src-id", "dst-id");
        assert_eq!(tracker.state, MigrationState::Pending);

        tracker.advance(MigrationState::Migrating);
        tracker.record_keys_moved(10);
        tracker.record_keys_moved(5);
        assert_eq!(tracker.keys_moved, 15);
        assert_eq!(tracker.state, MigrationState::Transferring { moved: 15 });

        tracker.advance(MigrationState::Drained);
        tracker.complete();
        assert!(tracker.is_done());
        assert!(tracker.state.is_complete());
    }

    #[test]
    fn tracker_failure() {
        let mut tracker = SlotMigrationTracker::new(7, "src-id", "dst-id");
        tracker.fail("migrate timeout");
        assert!(tracker.is_done());
        assert!(tracker.state.is_failed());
        assert!(!tracker.state.is_complete());
    }

    #[test]
    fn failure_report_display() {
        let failure = MigrationFailure {
            moved: vec![1, 2, 3, 4, 5, 6],
            failed_at: 7,
            reason: "migrate rejected".to_string(),
        };
        let rendered = format!("{}", failure);
        assert!(rendered.contains("6 slot(s)"));
        assert!(rendered.contains("slot 7"));
    }
}

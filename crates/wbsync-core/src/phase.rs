//! Transition phase machine
//!
//! Open and New walk `Idle|Active → Confirming → Draining → (BeforeCloseHook)
//! → Closing → Loading → Active`. Any failure from `Closing` on goes through
//! `RollingBack` back to the previous stable phase. Save and Save-As run as
//! `Active → Saving → Active`.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinator lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    /// No workbook loaded
    Idle,
    /// Asking the user whether to discard unsaved changes
    Confirming,
    /// Waiting for queued writes to finish
    Draining,
    /// Running the outgoing workbook's before-close hook
    BeforeCloseHook,
    /// Sync listener detached; swapping backend state
    Closing,
    /// Reading the new workbook into the document
    Loading,
    /// Workbook loaded and syncing
    Active,
    /// Restoring bindings of the previous workbook after a failure
    RollingBack,
    /// Save or Save-As in flight
    Saving,
}

impl TransitionPhase {
    /// Phases with no transition in flight
    #[inline]
    pub fn is_stable(self) -> bool {
        matches!(self, TransitionPhase::Idle | TransitionPhase::Active)
    }

    fn as_str(self) -> &'static str {
        match self {
            TransitionPhase::Idle => "idle",
            TransitionPhase::Confirming => "confirming",
            TransitionPhase::Draining => "draining",
            TransitionPhase::BeforeCloseHook => "before_close_hook",
            TransitionPhase::Closing => "closing",
            TransitionPhase::Loading => "loading",
            TransitionPhase::Active => "active",
            TransitionPhase::RollingBack => "rolling_back",
            TransitionPhase::Saving => "saving",
        }
    }
}

impl fmt::Display for TransitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases reachable from `from` in one step
pub fn allowed_transitions(from: TransitionPhase) -> Vec<TransitionPhase> {
    use TransitionPhase::*;
    match from {
        Idle => vec![Confirming],
        // Declined confirmation returns to whichever stable phase we came from.
        Confirming => vec![Draining, Idle, Active],
        Draining => vec![BeforeCloseHook, Closing],
        BeforeCloseHook => vec![Closing],
        Closing => vec![Loading, RollingBack],
        Loading => vec![Active, RollingBack],
        Active => vec![Confirming, Saving],
        RollingBack => vec![Idle, Active],
        Saving => vec![Active],
    }
}

/// Validate a single phase change
pub fn validate_transition(from: TransitionPhase, to: TransitionPhase) -> SyncResult<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SyncError::IllegalPhase { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use TransitionPhase::*;

    const ALL: [TransitionPhase; 9] = [
        Idle,
        Confirming,
        Draining,
        BeforeCloseHook,
        Closing,
        Loading,
        Active,
        RollingBack,
        Saving,
    ];

    #[test]
    fn open_path_is_legal() {
        let path = [Active, Confirming, Draining, BeforeCloseHook, Closing, Loading, Active];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn first_open_skips_hook() {
        let path = [Idle, Confirming, Draining, Closing, Loading, Active];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn loading_cannot_be_entered_before_closing() {
        assert!(validate_transition(Draining, Loading).is_err());
        assert!(validate_transition(Idle, Loading).is_err());
        assert!(validate_transition(Confirming, Closing).is_err());
    }

    #[test]
    fn saving_only_from_active() {
        assert!(validate_transition(Active, Saving).is_ok());
        assert!(validate_transition(Idle, Saving).is_err());
        assert!(validate_transition(Loading, Saving).is_err());
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(BeforeCloseHook.to_string(), "before_close_hook");
        assert_eq!(RollingBack.to_string(), "rolling_back");
    }

    fn phase() -> impl Strategy<Value = TransitionPhase> {
        proptest::sample::select(ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_walks_from_stable_return_to_stable(choices in proptest::collection::vec(0usize..8, 1..40)) {
            // Follow allowed edges; the machine must never dead-end.
            let mut current = Idle;
            for choice in choices {
                let next = allowed_transitions(current);
                prop_assert!(!next.is_empty(), "{} has no exits", current);
                current = next[choice % next.len()];
            }
        }

        #[test]
        fn prop_validate_agrees_with_table(from in phase(), to in phase()) {
            let listed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), listed);
        }

        #[test]
        fn prop_rollback_only_after_closing(from in phase()) {
            let can_roll_back = validate_transition(from, RollingBack).is_ok();
            prop_assert_eq!(can_roll_back, matches!(from, Closing | Loading));
        }
    }
}

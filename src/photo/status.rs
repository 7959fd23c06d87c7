//! Status transition rules.
//!
//! The lifecycle is a small fixed state machine; the decision for a
//! `(current, target)` pair is a pure function over a static table, and
//! every status mutation in the system goes through it.

use super::PhotoStatus;

/// Outcome of evaluating a requested transition against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Update the row, append the matching event, publish a notification.
    Apply,
    /// Current state is terminal; suppress silently.
    Noop,
    /// The pair is not in the table; caller has a bug.
    Reject,
}

/// Evaluate a requested transition.
///
/// Terminal states absorb everything. A repeated non-terminal target
/// (e.g. a reclaimed queue message re-entering `Processing`) is applied
/// again so the event log records the second attempt; duplicates are
/// expected under at-least-once delivery.
pub fn decide(current: PhotoStatus, target: PhotoStatus) -> TransitionDecision {
    use PhotoStatus::*;

    if current.is_terminal() {
        return TransitionDecision::Noop;
    }
    if current == target {
        return TransitionDecision::Apply;
    }
    match (current, target) {
        (Uploaded, Queued) | (Uploaded, Failed) => TransitionDecision::Apply,
        (Queued, Processing) | (Queued, Failed) => TransitionDecision::Apply,
        (Processing, Completed) | (Processing, Failed) => TransitionDecision::Apply,
        _ => TransitionDecision::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::TransitionDecision::*;
    use super::*;
    use PhotoStatus::*;

    #[test]
    fn allowed_forward_transitions() {
        assert_eq!(decide(Uploaded, Queued), Apply);
        assert_eq!(decide(Uploaded, Failed), Apply);
        assert_eq!(decide(Queued, Processing), Apply);
        assert_eq!(decide(Queued, Failed), Apply);
        assert_eq!(decide(Processing, Completed), Apply);
        assert_eq!(decide(Processing, Failed), Apply);
    }

    #[test]
    fn terminal_states_absorb_everything() {
        for target in [Uploaded, Queued, Processing, Completed, Failed] {
            assert_eq!(decide(Completed, target), Noop);
            assert_eq!(decide(Failed, target), Noop);
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert_eq!(decide(Uploaded, Processing), Reject);
        assert_eq!(decide(Uploaded, Completed), Reject);
        assert_eq!(decide(Queued, Completed), Reject);
        assert_eq!(decide(Queued, Uploaded), Reject);
        assert_eq!(decide(Processing, Queued), Reject);
        assert_eq!(decide(Processing, Uploaded), Reject);
    }

    #[test]
    fn redelivered_nonterminal_target_reapplies() {
        assert_eq!(decide(Processing, Processing), Apply);
        assert_eq!(decide(Queued, Queued), Apply);
    }
}

//! Job status state machine (spec.md Section 4.3).
//!
//! A pure function over `JobStatus` values, with no access to the state
//! store — the engine calls this before asking the store to persist a
//! transition, mirroring how the teacher keeps `loopd::scheduler`'s
//! next-state decision separate from `storage`'s commit.

use crate::errors::StateError;
use crate::types::JobStatus;

/// Whether `from -> to` is one of the allowed transitions:
///
/// - `PENDING -> RUNNING`
/// - `RUNNING -> COMPLETED | FAILED | BLOCKED`
/// - `FAILED -> PENDING`
/// - `BLOCKED -> PENDING`
///
/// Every other pair, including any `x -> x` and anything leaving
/// `COMPLETED`, is invalid.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Blocked)
            | (Failed, Pending)
            | (Blocked, Pending)
    )
}

/// Validate and apply a transition, returning the new status or a
/// `StateError::Transition` describing the rejected pair.
pub fn transition(from: JobStatus, to: JobStatus) -> Result<JobStatus, StateError> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(StateError::Transition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn pending_to_running_is_valid() {
        assert!(is_valid_transition(Pending, Running));
    }

    #[test]
    fn running_fans_out_to_three_terminals() {
        assert!(is_valid_transition(Running, Completed));
        assert!(is_valid_transition(Running, Failed));
        assert!(is_valid_transition(Running, Blocked));
    }

    #[test]
    fn failed_and_blocked_both_retry_to_pending() {
        assert!(is_valid_transition(Failed, Pending));
        assert!(is_valid_transition(Blocked, Pending));
    }

    #[test]
    fn completed_is_a_dead_end() {
        for to in [Pending, Running, Completed, Failed, Blocked] {
            assert!(!is_valid_transition(Completed, to));
        }
    }

    #[test]
    fn self_transitions_are_all_invalid() {
        for s in [Pending, Running, Completed, Failed, Blocked] {
            assert!(!is_valid_transition(s, s));
        }
    }

    #[test]
    fn transition_reports_from_and_to_in_error() {
        let err = transition(Pending, Completed).unwrap_err();
        match err {
            StateError::Transition { from, to } => {
                assert_eq!(from, "PENDING");
                assert_eq!(to, "COMPLETED");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn transition_ok_returns_the_new_status() {
        assert_eq!(transition(Running, Failed).unwrap(), Failed);
    }
}

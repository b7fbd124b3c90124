//! Property-based tests for the protocol state machine
//!
//! Random walks over the transition table check that sessions only move along
//! legal edges, that terminal states stick, and that snapshots never change
//! once handed out.

use fx_agreement::error::{ErrorKind, WorkflowError};
use fx_agreement::session::{ProtocolState, WorkflowSession};
use proptest::prelude::*;

const ALL: [ProtocolState; 8] = [
    ProtocolState::Building,
    ProtocolState::LocallyValidated,
    ProtocolState::SentForCountersignature,
    ProtocolState::CounterpartyValidating,
    ProtocolState::FullySigned,
    ProtocolState::Finalizing,
    ProtocolState::Finalized,
    ProtocolState::Rejected,
];

// PROPERTY TEST STRATEGIES

fn state_strategy() -> impl Strategy<Value = ProtocolState> {
    (0usize..ALL.len()).prop_map(|i| ALL[i])
}

/// Requested transitions, legal or not
fn walk_strategy() -> impl Strategy<Value = Vec<ProtocolState>> {
    prop::collection::vec(state_strategy(), 0..20)
}

fn terminal_error_strategy() -> impl Strategy<Value = WorkflowError> {
    prop_oneof![
        "[a-z ]{0,20}".prop_map(WorkflowError::CounterpartyRejected),
        "[a-z ]{0,20}".prop_map(WorkflowError::FinalizationConflict),
        "[a-z ]{0,20}".prop_map(WorkflowError::Cancelled),
        "[a-z ]{0,20}".prop_map(WorkflowError::UnknownParty),
    ]
}

// PROPERTY TESTS
proptest! {
    /// Property: a walk only ever records legal transitions, and failed steps change nothing
    #[test]
    fn prop_walks_follow_the_table(walk in walk_strategy()) {
        let mut session = WorkflowSession::initiate("12345");

        for to in walk {
            let before = session.state();
            match session.advance(to) {
                Ok(next) => {
                    prop_assert!(before.can_transition_to(to));
                    prop_assert_eq!(next.history().len(), session.history().len() + 1);
                    session = next;
                }
                Err(err) => {
                    prop_assert!(!before.can_transition_to(to));
                    prop_assert_eq!(err.kind(), ErrorKind::Misuse);
                    prop_assert_eq!(session.state(), before);
                }
            }
        }

        for pair in session.history().windows(2) {
            prop_assert_eq!(pair[0].to, pair[1].from);
        }
    }

    /// Property: once terminal, no transition is accepted
    #[test]
    fn prop_terminal_states_are_absorbing(walk in walk_strategy(), to in state_strategy()) {
        let mut session = WorkflowSession::initiate("12345");
        for step in walk {
            if let Ok(next) = session.advance(step) {
                session = next;
            }
        }
        if session.is_terminal() {
            prop_assert!(session.advance(to).is_err());
        }
    }

    /// Property: rejecting a live session always lands in Rejected with the first cause kept
    #[test]
    fn prop_reject_keeps_first_cause(
        walk in walk_strategy(),
        first in terminal_error_strategy(),
        second in terminal_error_strategy(),
    ) {
        let mut session = WorkflowSession::initiate("12345");
        for step in walk {
            if let Ok(next) = session.advance(step) {
                session = next;
            }
        }
        prop_assume!(!session.is_terminal());

        let rejected = session.reject(&first);
        prop_assert_eq!(rejected.state(), ProtocolState::Rejected);
        prop_assert_eq!(rejected.rejection().map(|r| r.kind), Some(first.kind()));

        let again = rejected.reject(&second);
        prop_assert_eq!(again.rejection(), rejected.rejection());
        prop_assert_eq!(again.history().len(), rejected.history().len());
    }

    /// Property: cancellation succeeds exactly in the cancellable states
    #[test]
    fn prop_cancel_matches_cancellable(walk in walk_strategy()) {
        let mut session = WorkflowSession::initiate("12345");
        for step in walk {
            if let Ok(next) = session.advance(step) {
                session = next;
            }
        }
        let state = session.state();

        match session.cancel("walked away") {
            Ok(cancelled) => {
                prop_assert!(state.is_cancellable());
                prop_assert_eq!(cancelled.state(), ProtocolState::Rejected);
            }
            Err(err) => {
                prop_assert!(!state.is_cancellable());
                prop_assert_eq!(err, WorkflowError::NotCancellable(state));
            }
        }
    }
}

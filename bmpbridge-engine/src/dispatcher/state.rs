//! Consumer group lifecycle as a pure state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupState {
    /// Waiting for the coordinator to assign partitions.
    Joining,
    /// Assignment received; the ready signal fires once here.
    Setup,
    /// One claim loop per assigned partition is running.
    Claiming,
    /// Claim loops have returned; offsets are committed and the session closed.
    Cleanup,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupEvent {
    Assigned,
    Ready,
    /// Every claim stream closed (rebalance or transport error).
    SessionEnded,
    CleanedUp,
    JoinFailed,
    Cancelled,
}

/// Next state for `event` in `state`. Events that do not apply leave the
/// state unchanged.
pub fn transition(state: GroupState, event: GroupEvent) -> GroupState {
    use GroupEvent::*;
    use GroupState::*;

    match (state, event) {
        (Stopped, _) => Stopped,

        (Joining, Assigned) => Setup,
        (Joining, JoinFailed) => Joining,
        (Joining, Cancelled) => Stopped,

        (Setup, Ready) => Claiming,
        (Setup, Cancelled) => Cleanup,

        (Claiming, SessionEnded) | (Claiming, Cancelled) => Cleanup,

        (Cleanup, CleanedUp) => Joining,
        (Cleanup, Cancelled) => Stopped,

        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GroupEvent::*;
    use GroupState::*;

    fn run(events: &[GroupEvent]) -> GroupState {
        events.iter().fold(Joining, |state, event| transition(state, *event))
    }

    #[test]
    fn session_cycle_returns_to_joining() {
        assert_eq!(run(&[Assigned, Ready, SessionEnded, CleanedUp]), Joining);
    }

    #[test]
    fn join_failure_retries() {
        assert_eq!(run(&[JoinFailed, JoinFailed, Assigned]), Setup);
    }

    #[test]
    fn cancellation_always_reaches_stopped() {
        assert_eq!(run(&[Cancelled]), Stopped);
        assert_eq!(run(&[Assigned, Cancelled, Cancelled]), Stopped);
        assert_eq!(run(&[Assigned, Ready, Cancelled, Cancelled]), Stopped);
        assert_eq!(run(&[Assigned, Ready, SessionEnded, Cancelled]), Stopped);
    }

    #[test]
    fn stopped_is_terminal() {
        for event in [Assigned, Ready, SessionEnded, CleanedUp, JoinFailed, Cancelled] {
            assert_eq!(transition(Stopped, event), Stopped);
        }
    }

    #[test]
    fn inapplicable_events_are_ignored() {
        assert_eq!(transition(Joining, Ready), Joining);
        assert_eq!(transition(Claiming, Assigned), Claiming);
        assert_eq!(transition(Setup, CleanedUp), Setup);
    }
}

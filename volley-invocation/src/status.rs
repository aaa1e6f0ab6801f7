//! Run state machine for an invocation tracker
//!
//! `RunState::on` is the only place state changes are decided. It is pure so
//! every transition can be tested without I/O.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    StopRequested,
    Stopped,
    Completed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Dispatch began
    Start,
    /// A stop was requested for this tracker
    RequestStop,
    /// The dispatch loop saw the stop at a round boundary
    StopObserved,
    /// The last round finished
    RoundsExhausted,
    /// The tracker was torn down
    Close,
}

impl RunState {
    pub fn on(self, event: RunEvent) -> RunState {
        use RunEvent::*;
        use RunState::*;

        match (self, event) {
            (_, Close) => Closed,
            (Closed, _) => Closed,

            (Pending, Start) => Running,
            (Pending | Running, RequestStop) => StopRequested,
            (Pending | Running | StopRequested, StopObserved) => Stopped,
            (Pending | Running | StopRequested, RoundsExhausted) => Completed,

            (state, _) => state,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::StopRequested => "stopRequested",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
            RunState::Closed => "closed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live status of one tracker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub completed_rounds: u32,
    pub state: RunState,
    pub stop_requested: bool,
    pub stopped: bool,
    pub closed: bool,
    pub client_bound: bool,
}

impl Status {
    /// Apply an event. Returns true if the state changed.
    ///
    /// The boolean flags are sticky: once set they stay set through Closed.
    pub fn apply(&mut self, event: RunEvent) -> bool {
        let next = self.state.on(event);
        if next == self.state {
            return false;
        }
        self.state = next;
        match next {
            RunState::StopRequested => self.stop_requested = true,
            RunState::Stopped => self.stopped = true,
            RunState::Closed => {
                self.closed = true;
                self.client_bound = false;
            }
            _ => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = RunState::Pending
            .on(RunEvent::Start)
            .on(RunEvent::RoundsExhausted);
        assert_eq!(state, RunState::Completed);
        assert_eq!(state.on(RunEvent::Close), RunState::Closed);
    }

    #[test]
    fn test_stop_path() {
        let state = RunState::Running.on(RunEvent::RequestStop);
        assert_eq!(state, RunState::StopRequested);
        assert_eq!(state.on(RunEvent::StopObserved), RunState::Stopped);
    }

    #[test]
    fn test_stop_requested_during_last_round_completes() {
        let state = RunState::StopRequested.on(RunEvent::RoundsExhausted);
        assert_eq!(state, RunState::Completed);
    }

    #[test]
    fn test_stop_on_terminal_states_is_noop() {
        for state in [RunState::Stopped, RunState::Completed, RunState::Closed] {
            assert_eq!(state.on(RunEvent::RequestStop), state);
            assert_eq!(state.on(RunEvent::StopObserved), state);
        }
        assert_eq!(RunState::Closed.on(RunEvent::Start), RunState::Closed);
    }

    #[test]
    fn test_stopped_flag_set_exactly_once() {
        let mut status = Status::default();
        assert!(status.apply(RunEvent::Start));
        assert!(status.apply(RunEvent::RequestStop));
        assert!(!status.apply(RunEvent::RequestStop));
        assert!(status.apply(RunEvent::StopObserved));
        assert!(status.stopped);
        assert!(!status.apply(RunEvent::StopObserved));

        assert!(status.apply(RunEvent::Close));
        assert!(status.closed && status.stopped && status.stop_requested);
        assert!(!status.apply(RunEvent::Close));
    }

    #[test]
    fn test_status_json() {
        let status = Status {
            completed_rounds: 2,
            state: RunState::Running,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["completedRounds"], 2);
        assert_eq!(json["state"], "running");
        assert_eq!(json["stopRequested"], false);
    }
}

//! The current [`FlowState`] and the only code allowed to change it.
//!
//! [`StateMachine::execute_action`] validates against the transition table
//! and reports every real change as [`SessionEvent::StateChanged`], so
//! state-change events come out in exactly the order transitions happen.

use super::events::{EventSink, SessionError, SessionEvent};
use super::state::{self, Action, FlowState};

pub struct StateMachine {
    current: FlowState,
    events: EventSink,
}

impl StateMachine {
    pub fn new(events: EventSink) -> Self {
        Self {
            current: FlowState::Idle,
            events,
        }
    }

    pub fn current(&self) -> FlowState {
        self.current
    }

    pub fn allowed_actions(&self) -> Vec<Action> {
        state::allowed_actions(self.current)
    }

    /// Apply `action`.  Self-rules (pause/resume) are accepted without a
    /// state change or event.  An action with no rule for the current state
    /// is a lifecycle error and changes nothing.
    pub fn execute_action(&mut self, action: Action, generation: u64) -> Result<FlowState, SessionError> {
        let Some(next) = state::transition(self.current, action) else {
            return Err(SessionError::lifecycle(format!(
                "cannot {action} while {}",
                self.current.label()
            )));
        };
        if next != self.current {
            log::debug!("session: {} --{action}--> {}", self.current, next);
            self.current = next;
            self.events.emit(generation, SessionEvent::StateChanged(next));
        }
        Ok(next)
    }

    /// Return to idle outside the table, after a failure or a stop from a
    /// phase that has no stop rule.  Returns `true` if the state changed.
    pub fn force_idle(&mut self, generation: u64) -> bool {
        if self.current == FlowState::Idle {
            return false;
        }
        log::debug!("session: {} --forced--> idle", self.current);
        self.current = FlowState::Idle;
        self.events.emit(generation, SessionEvent::StateChanged(FlowState::Idle));
        true
    }
}

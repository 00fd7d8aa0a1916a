//! One runner per [`FlowState`].
//!
//! The driver task enters a phase, awaits its self-reported outcome, exits
//! it, and only then asks the machine for the next state:
//!
//! ```text
//! wait_while_paused ─▶ enter(run, token) ─▶ exit(run) ─▶ execute_action(outcome)
//! ```
//!
//! `enter` owns every await of its phase and races each one against the
//! phase token, so cancelling the token is enough to stop a phase.  `pause`
//! and `resume` are called from the public API while `enter` is suspended
//! somewhere; they only touch the timer and adapters, never the machine.

mod cue;
mod idle;
mod processing;
mod prompt;
mod recording;
mod timeout;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;

use super::run::RunScope;
use super::state::{self, Action, DisplayInfo, FlowState, StateContext};

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseOutcome {
    /// Feed this action to the machine.
    Advance(Action),
    /// The token fired; the phase did nothing further.
    Cancelled,
}

#[async_trait]
pub(crate) trait Phase: Send + Sync {
    fn state(&self) -> FlowState;

    /// Run the phase to its outcome.  Adapter failures are returned, not
    /// reported; the driver turns them into an error event.
    async fn enter(&self, run: &RunScope, token: &CancellationToken)
        -> Result<PhaseOutcome, AdapterError>;

    /// Settle whatever `enter` left running.  Called only after a
    /// non-cancelled outcome.
    async fn exit(&self, _run: &RunScope) -> Result<(), AdapterError> {
        Ok(())
    }

    fn pause(&self, _run: &RunScope) {}

    fn resume(&self, _run: &RunScope) {}

    fn allowed_actions(&self) -> Vec<Action> {
        state::allowed_actions(self.state())
    }

    fn display_info(&self, ctx: &StateContext) -> DisplayInfo {
        state::display_info(self.state(), ctx)
    }
}

static IDLE: idle::IdlePhase = idle::IdlePhase;
static PROMPT: prompt::PromptPhase = prompt::PromptPhase;
static CUE: cue::CuePhase = cue::CuePhase;
static RECORDING: recording::RecordingPhase = recording::RecordingPhase;
static PROCESSING: processing::ProcessingPhase = processing::ProcessingPhase;
static TIMEOUT: timeout::TimeoutPhase = timeout::TimeoutPhase;

pub(crate) fn phase_for(state: FlowState) -> &'static dyn Phase {
    match state {
        FlowState::Idle => &IDLE,
        FlowState::Prompt => &PROMPT,
        FlowState::Cue => &CUE,
        FlowState::Recording => &RECORDING,
        FlowState::Processing => &PROCESSING,
        FlowState::Timeout => &TIMEOUT,
    }
}

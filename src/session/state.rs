//! Flow states, actions and the static transition table.
//!
//! Everything in this file is pure: no adapters, no timers, no locks.  The
//! [`StateMachine`](super::machine::StateMachine) and the phase runners build
//! on top of it, which keeps the table itself unit-testable on its own.
//!
//! ```text
//! idle ──start──▶ prompt ──complete──▶ cue ──complete──▶ recording
//!                                                          │  │
//!                        ┌─────────────complete────────────┘  │
//!                        ▼                                    ▼
//!                    processing ──complete──▶ idle ◀──complete── timeout
//!
//! {prompt, cue, recording, timeout} ──stop──▶ idle
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FlowState
// ---------------------------------------------------------------------------

/// The phase a drill session is in.  Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// No session running; waiting for `start`.
    #[default]
    Idle,
    /// The prompt is being spoken.
    Prompt,
    /// Think countdown followed by the cue tone.
    Cue,
    /// Microphone and recognizer are capturing the answer.
    Recording,
    /// The captured answer is being transcribed.
    Processing,
    /// Nothing was said before the record budget ran out.
    Timeout,
}

impl FlowState {
    /// Every state, in the order of the normal path.
    pub const ALL: [FlowState; 6] = [
        FlowState::Idle,
        FlowState::Prompt,
        FlowState::Cue,
        FlowState::Recording,
        FlowState::Processing,
        FlowState::Timeout,
    ];

    /// Short label for logs and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::Prompt => "prompt",
            FlowState::Cue => "cue",
            FlowState::Recording => "recording",
            FlowState::Processing => "processing",
            FlowState::Timeout => "timeout",
        }
    }

    /// Human-readable status shown to the learner.
    pub fn description(&self) -> &'static str {
        match self {
            FlowState::Idle => "Ready",
            FlowState::Prompt => "Listen to the prompt",
            FlowState::Cue => "Get ready to answer",
            FlowState::Recording => "Speak your answer",
            FlowState::Processing => "Checking your answer",
            FlowState::Timeout => "Time is up",
        }
    }

    /// `true` for every state except [`FlowState::Idle`].
    pub fn is_active(&self) -> bool {
        !matches!(self, FlowState::Idle)
    }

    /// Phases that own an ongoing adapter operation or countdown and can
    /// therefore be suspended.
    pub fn is_suspendable(&self) -> bool {
        matches!(
            self,
            FlowState::Prompt | FlowState::Cue | FlowState::Recording
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Pause,
    Resume,
    Stop,
    Timeout,
    Complete,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Stop => "stop",
            Action::Timeout => "timeout",
            Action::Complete => "complete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// One entry of the static transition table.
///
/// Rules with `from == to` accept the action without changing state (used
/// for pause/resume on the suspendable phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: FlowState,
    pub action: Action,
    pub to: FlowState,
}

const fn rule(from: FlowState, action: Action, to: FlowState) -> TransitionRule {
    TransitionRule { from, action, to }
}

/// The complete rule set.  Any `(state, action)` pair not listed is rejected.
pub static TRANSITION_RULES: &[TransitionRule] = &[
    // normal path
    rule(FlowState::Idle, Action::Start, FlowState::Prompt),
    rule(FlowState::Prompt, Action::Complete, FlowState::Cue),
    rule(FlowState::Cue, Action::Complete, FlowState::Recording),
    rule(FlowState::Recording, Action::Complete, FlowState::Processing),
    rule(FlowState::Processing, Action::Complete, FlowState::Idle),
    // timeout path
    rule(FlowState::Recording, Action::Timeout, FlowState::Timeout),
    rule(FlowState::Timeout, Action::Complete, FlowState::Idle),
    // universal abort
    rule(FlowState::Prompt, Action::Stop, FlowState::Idle),
    rule(FlowState::Cue, Action::Stop, FlowState::Idle),
    rule(FlowState::Recording, Action::Stop, FlowState::Idle),
    rule(FlowState::Timeout, Action::Stop, FlowState::Idle),
    // suspension
    rule(FlowState::Prompt, Action::Pause, FlowState::Prompt),
    rule(FlowState::Prompt, Action::Resume, FlowState::Prompt),
    rule(FlowState::Cue, Action::Pause, FlowState::Cue),
    rule(FlowState::Cue, Action::Resume, FlowState::Cue),
    rule(FlowState::Recording, Action::Pause, FlowState::Recording),
    rule(FlowState::Recording, Action::Resume, FlowState::Recording),
];

/// Look up the target of `action` in state `from`.
///
/// ```
/// use speech_drill::session::{transition, Action, FlowState};
///
/// assert_eq!(transition(FlowState::Idle, Action::Start), Some(FlowState::Prompt));
/// assert_eq!(transition(FlowState::Idle, Action::Pause), None);
/// ```
pub fn transition(from: FlowState, action: Action) -> Option<FlowState> {
    TRANSITION_RULES
        .iter()
        .find(|r| r.from == from && r.action == action)
        .map(|r| r.to)
}

/// Every action the table accepts in `state`, in table order.
pub fn allowed_actions(state: FlowState) -> Vec<Action> {
    TRANSITION_RULES
        .iter()
        .filter(|r| r.from == state)
        .map(|r| r.action)
        .collect()
}

// ---------------------------------------------------------------------------
// StateContext
// ---------------------------------------------------------------------------

/// Per-session data carried across phases.
///
/// Created by the session at `start`, discarded when the session returns to
/// idle.  Only the active phase and the session mutate it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateContext {
    /// Remaining time of the countdown currently running (zero if none).
    pub remaining_time: Duration,
    /// Set while the session is suspended.
    pub is_paused: bool,
    /// The prompt handed to `start`.
    pub current_prompt: Option<String>,
    /// Answer spoken when the learner runs out of time.
    pub fallback_answer_text: Option<String>,
    /// Configured record budget for this session.
    pub recording_duration: Duration,
    /// Total of the countdown currently running, used for progress.
    pub countdown_total: Duration,
}

impl StateContext {
    pub fn new(prompt: impl Into<String>, fallback_answer_text: Option<String>) -> Self {
        Self {
            current_prompt: Some(prompt.into()),
            fallback_answer_text,
            ..Self::default()
        }
    }

    /// Fraction of the running countdown already consumed, in percent.
    pub fn progress_percent(&self) -> f32 {
        if self.countdown_total.is_zero() {
            return 0.0;
        }
        let total = self.countdown_total.as_secs_f32();
        let remaining = self.remaining_time.as_secs_f32().min(total);
        ((total - remaining) / total * 100.0).clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// DisplayInfo
// ---------------------------------------------------------------------------

/// Read-only snapshot for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayInfo {
    pub state: FlowState,
    pub status: String,
    /// 0.0 – 100.0
    pub progress: f32,
    pub remaining_secs: f32,
    pub is_paused: bool,
    pub allowed_actions: Vec<Action>,
}

/// Build the display snapshot for `state` given the current context.
///
/// While paused, only `resume` and `stop` are offered.
pub fn display_info(state: FlowState, ctx: &StateContext) -> DisplayInfo {
    let mut actions = allowed_actions(state);
    if ctx.is_paused {
        actions.retain(|a| matches!(a, Action::Resume | Action::Stop));
    } else {
        actions.retain(|a| *a != Action::Resume);
    }

    let status = if ctx.is_paused {
        format!("{} (paused)", state.description())
    } else {
        state.description().to_string()
    };

    let progress = match state {
        FlowState::Idle => 0.0,
        FlowState::Processing => 100.0,
        _ => ctx.progress_percent(),
    };

    DisplayInfo {
        state,
        status,
        progress,
        remaining_secs: ctx.remaining_time.as_secs_f32(),
        is_paused: ctx.is_paused,
        allowed_actions: actions,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Session notifications, results and errors.
//!
//! Notifications travel over a tokio mpsc channel as [`SessionEvent`]s, so
//! they are never delivered from inside the public call that triggered
//! them.  Each event is stamped with the session *generation*; `stop()`
//! advances the generation and [`SessionEvents`] silently drops anything
//! stamped by an earlier one, which is what guarantees that a cancelled run
//! cannot be heard from again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::adapters::{AdapterError, AdapterKind};

use super::state::FlowState;

// ---------------------------------------------------------------------------
// SessionResult
// ---------------------------------------------------------------------------

/// Outcome of a completed session, produced once on Processing → Idle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub transcript: String,
    /// 0.0 – 1.0
    pub confidence: f32,
    /// 16 kHz mono 16-bit WAV.
    #[serde(skip)]
    pub captured_audio: Option<Vec<u8>>,
    pub elapsed: Duration,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bad precondition: empty prompt, start while active, resume while running.
    Validation,
    /// Action not accepted by the current state.
    Lifecycle,
    /// An adapter failed while a phase was running.
    Adapter(AdapterKind),
    /// The host lacks a capability the session needs.
    Capability,
}

/// An error surfaced by the session, either returned synchronously
/// (validation, lifecycle, capability) or delivered as
/// [`SessionEvent::Error`] (adapter failures).
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl SessionError {
    fn new(code: ErrorCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, Severity::Low, message)
    }

    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Lifecycle, Severity::Medium, message)
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Capability, Severity::Critical, message)
    }

    /// Wrap an adapter failure.  Losing the microphone or recognizer ends the
    /// exercise outright, so those rank above playback problems.
    pub fn adapter(err: &AdapterError) -> Self {
        let kind = err.kind();
        let severity = match (kind, err) {
            (_, AdapterError::Unavailable { .. }) => Severity::Critical,
            (AdapterKind::Recorder | AdapterKind::Recognizer, _) => Severity::High,
            (AdapterKind::Synthesis | AdapterKind::Tone, _) => Severity::Medium,
        };
        Self::new(ErrorCode::Adapter(kind), severity, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Everything a caller can observe about a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The machine entered a new state.  Fired strictly in transition order.
    StateChanged(FlowState),
    /// Countdown progress of the current phase.
    TimeUpdate { remaining_secs: f32 },
    /// The answer was transcribed.  At most once per session.
    Result(SessionResult),
    /// An adapter failed; the session has been returned to idle.
    Error(SessionError),
    /// The record budget ran out without any recognised speech.
    Timeout,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Sending half, cloned into every phase and timer callback.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<(u64, SessionEvent)>,
    generation: Arc<AtomicU64>,
}

impl EventSink {
    /// Deliver `event` on behalf of `generation`.  Stale generations are
    /// dropped here already; a closed receiver is not an error.
    pub fn emit(&self, generation: u64, event: SessionEvent) {
        if generation != self.current_generation() {
            log::trace!("events: dropping stale {event:?} (generation {generation})");
            return;
        }
        let _ = self.tx.send((generation, event));
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every event stamped so far, including ones already queued.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Receiving half handed to the caller.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<(u64, SessionEvent)>,
    generation: Arc<AtomicU64>,
}

impl SessionEvents {
    /// Next event of the current generation; `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            let (generation, event) = self.rx.recv().await?;
            if generation == self.generation.load(Ordering::SeqCst) {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            let (generation, event) = self.rx.try_recv().ok()?;
            if generation == self.generation.load(Ordering::SeqCst) {
                return Some(event);
            }
        }
    }
}

/// Create a connected sink/receiver pair.
pub fn channel() -> (EventSink, SessionEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let generation = Arc::new(AtomicU64::new(0));
    (
        EventSink {
            tx,
            generation: Arc::clone(&generation),
        },
        SessionEvents { rx, generation },
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

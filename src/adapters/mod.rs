//! Phase adapters: the four capabilities a drill session is built from.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌─────────────┐  ┌────────────┐  ┌──────────────┐
//! │ Synthesizer  │  │ TonePlayer  │  │  Recorder  │  │  Recognizer  │
//! │ speak/pause/ │  │ play/stop   │  │ start/stop │  │ listen/stop  │
//! │ resume/cancel│  │             │  │ pause/res. │  │ pause/res.   │
//! └──────┬───────┘  └──────┬──────┘  └─────┬──────┘  └──────┬───────┘
//!        │                 │               │ AudioFeed      │
//!  CommandSynthesizer CpalTonePlayer  CpalRecorder ───▶ WhisperRecognizer
//! ```
//!
//! Every trait is object-safe and `Send + Sync` so a session can hold the
//! adapters behind `Arc<dyn …>`.  None of them knows anything about
//! sessions or phases.  Every `stop`/`cancel` is a harmless no-op when the
//! adapter was never started, because the session's abort path calls them
//! unconditionally.

pub mod control;
pub mod recognizer;
pub mod recorder;
pub mod synthesis;
pub mod tone;

#[cfg(test)]
pub mod fakes;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use recognizer::WhisperRecognizer;
pub use recorder::{AudioFeed, CpalRecorder};
pub use synthesis::CommandSynthesizer;
pub use tone::CpalTonePlayer;

// ---------------------------------------------------------------------------
// AdapterKind / AdapterError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Synthesis,
    Tone,
    Recorder,
    Recognizer,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdapterKind::Synthesis => "speech synthesis",
            AdapterKind::Tone => "tone output",
            AdapterKind::Recorder => "audio recording",
            AdapterKind::Recognizer => "speech recognition",
        })
    }
}

/// Failure reported by an adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The capability is missing on this host.
    #[error("{kind} unavailable: {reason}")]
    Unavailable { kind: AdapterKind, reason: String },

    /// The capability exists but the operation failed.
    #[error("{kind} failed: {reason}")]
    Failed { kind: AdapterKind, reason: String },
}

impl AdapterError {
    pub fn unavailable(kind: AdapterKind, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            kind,
            reason: reason.into(),
        }
    }

    pub fn failed(kind: AdapterKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            AdapterError::Unavailable { kind, .. } | AdapterError::Failed { kind, .. } => *kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Voice settings for one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakOptions {
    /// BCP-47 / ISO-639-1 language hint, e.g. `"ko"`.
    pub language: Option<String>,
    /// Engine-specific voice name.
    pub voice: Option<String>,
    /// Words per minute; `None` keeps the engine default.
    pub rate_wpm: Option<u32>,
}

/// Text-to-speech playback.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text`, resolving once playback ends.
    ///
    /// Resolves exactly once per call.  A `cancel` during playback resolves
    /// the call with `Ok(())` instead of leaving it pending.
    async fn speak(&self, text: &str, opts: &SpeakOptions) -> Result<(), AdapterError>;

    fn pause(&self);

    fn resume(&self);

    fn cancel(&self);

    fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// TonePlayer
// ---------------------------------------------------------------------------

/// Short beep generator.  Not pausable; `stop` ends the tone early and
/// resolves the pending `play` with `Ok(())`.
#[async_trait]
pub trait TonePlayer: Send + Sync {
    async fn play(&self, frequency_hz: f32, duration: Duration) -> Result<(), AdapterError>;

    fn stop(&self);

    fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Audio captured during one recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedAudio {
    /// Mono `f32` samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CapturedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Microphone capture.
///
/// The input device is opened lazily on the first `start` and held until
/// `release`; `stop` only ends the current take.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;

    fn pause(&self);

    fn resume(&self);

    /// End the current take and hand back what was captured.  Returns empty
    /// audio when nothing was started.
    async fn stop(&self) -> Result<CapturedAudio, AdapterError>;

    /// Close the input device.  Idempotent.
    fn release(&self);

    fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

/// Tuning for one listening pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenOptions {
    /// RMS level above which a frame counts as speech.
    pub vad_threshold: f32,
    /// Trailing silence that ends an utterance.
    pub end_silence: Duration,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            vad_threshold: 0.02,
            end_silence: Duration::from_millis(800),
        }
    }
}

/// Progress reported while listening.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Voice activity began.
    SpeechStarted,
    /// Voice activity was followed by enough silence to end the utterance.
    SpeechEnded,
}

/// Final recognition output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// 0.0 – 1.0
    pub confidence: f32,
}

impl Transcript {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Speech recognition.
///
/// While paused, incoming audio is dropped rather than buffered so nothing
/// stale reaches a later transcript.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn start_listening(
        &self,
        opts: &ListenOptions,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, AdapterError>;

    fn pause(&self);

    fn resume(&self);

    /// Finish listening and transcribe what was heard.  Returns an empty
    /// transcript when nothing was started or nothing was said.
    async fn stop_listening(&self) -> Result<Transcript, AdapterError>;

    /// Stop listening and throw the buffered audio away.  Idempotent.
    fn cancel(&self);

    fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Adapters bundle
// ---------------------------------------------------------------------------

/// The four adapters a session drives, shared behind `Arc`s.
#[derive(Clone)]
pub struct Adapters {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub tone: Arc<dyn TonePlayer>,
    pub recorder: Arc<dyn Recorder>,
    pub recognizer: Arc<dyn Recognizer>,
}

impl Adapters {
    /// Every capability that reports itself unavailable.
    pub fn missing_capabilities(&self) -> Vec<AdapterKind> {
        let mut missing = Vec::new();
        if !self.synthesizer.is_available() {
            missing.push(AdapterKind::Synthesis);
        }
        if !self.recognizer.is_available() {
            missing.push(AdapterKind::Recognizer);
        }
        if !self.recorder.is_available() {
            missing.push(AdapterKind::Recorder);
        }
        if !self.tone.is_available() {
            missing.push(AdapterKind::Tone);
        }
        missing
    }

    /// Cancel whatever is in flight and give back the microphone and any
    /// output stream.  Every call here is a no-op on an idle adapter.
    pub fn teardown(&self) {
        self.synthesizer.cancel();
        self.tone.stop();
        self.recognizer.cancel();
        self.recorder.release();
    }
}

// Compile-time assertion: every adapter trait is object-safe.
const _: fn() = || {
    fn _assert_object_safe(
        _: Box<dyn Synthesizer>,
        _: Box<dyn TonePlayer>,
        _: Box<dyn Recorder>,
        _: Box<dyn Recognizer>,
    ) {
    }
};

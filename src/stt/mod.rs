//! Whisper-backed speech-to-text.
//!
//! ```rust,no_run
//! use speech_drill::stt::{SttEngine, TranscribeParams, WhisperEngine};
//!
//! let engine = WhisperEngine::load("models/ggml-base.bin", TranscribeParams::default(), false)
//!     .expect("model present");
//! let out = engine.transcribe(&vec![0.0; 16_000]).unwrap();
//! println!("{} ({:.2})", out.text, out.confidence);
//! ```

pub mod engine;
pub mod transcribe;

pub use engine::{
    pad_to_minimum, resolve_model_path, SttEngine, SttError, WhisperEngine, MAX_AUDIO_SAMPLES,
    MIN_AUDIO_SAMPLES,
};
pub use transcribe::{SamplingStrategy, TranscribeParams, TranscriptionResult};

#[cfg(test)]
pub use engine::MockSttEngine;

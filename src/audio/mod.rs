//! Audio plumbing shared by the recorder, recognizer and tone adapters.
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (std mpsc) → to_mono_16k
//!           → RingBuffer (take)  ─┐
//!           → AudioFeed (broadcast) → SpeechTracker → Whisper
//!                                 └→ encode_wav (result audio)
//! ```

pub mod buffer;
pub mod capture;
pub mod resample;
pub mod vad;
pub mod wav;

pub use buffer::RingBuffer;
pub use capture::{input_available, AudioChunk, CaptureError, InputDevice, StreamHandle};
pub use resample::{downmix, resample_to_16k, to_mono_16k, TARGET_RATE};
pub use vad::{SpeechEdge, SpeechTracker, VadDetector, FRAME_SAMPLES};
pub use wav::encode_wav;

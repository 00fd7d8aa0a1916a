//! Energy-based voice activity detection.
//!
//! Audio is cut into 30 ms frames (480 samples at 16 kHz) and a frame counts
//! as voice when its RMS exceeds the threshold.  Two consumers:
//!
//! * [`VadDetector::trim_silence`] cuts silence off both ends of a finished
//!   take before it is handed to Whisper, which otherwise hallucinates text
//!   in quiet stretches.
//! * [`SpeechTracker`] follows a live stream and reports when the speaker
//!   starts and when they have stopped for long enough to end the answer.

use std::time::Duration;

/// 30 ms at 16 kHz.
pub const FRAME_SAMPLES: usize = 480;
const FRAME_DURATION: Duration = Duration::from_millis(30);

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// VadDetector
// ---------------------------------------------------------------------------

/// ```rust
/// use speech_drill::audio::VadDetector;
///
/// let mut audio = vec![0.0_f32; 480];
/// audio.extend(vec![0.5_f32; 480]);
/// audio.extend(vec![0.0_f32; 480]);
///
/// assert_eq!(VadDetector::new(0.02).trim_silence(&audio).len(), 480);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct VadDetector {
    rms_threshold: f32,
}

impl VadDetector {
    pub fn new(rms_threshold: f32) -> Self {
        Self { rms_threshold }
    }

    pub fn is_voice(&self, frame: &[f32]) -> bool {
        rms(frame) > self.rms_threshold
    }

    /// Sub-slice from the first to the last voice frame; empty when the whole
    /// clip is silent.
    pub fn trim_silence<'a>(&self, audio: &'a [f32]) -> &'a [f32] {
        let voiced: Vec<usize> = audio
            .chunks(FRAME_SAMPLES)
            .enumerate()
            .filter(|(_, frame)| self.is_voice(frame))
            .map(|(i, _)| i)
            .collect();

        match (voiced.first(), voiced.last()) {
            (Some(&first), Some(&last)) => {
                let start = first * FRAME_SAMPLES;
                let end = ((last + 1) * FRAME_SAMPLES).min(audio.len());
                &audio[start..end]
            }
            _ => &audio[0..0],
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEdge {
    Started,
    Ended,
}

/// Streaming start/end-of-speech detector over 16 kHz mono chunks of any
/// size.
#[derive(Debug)]
pub struct SpeechTracker {
    vad: VadDetector,
    end_silence_frames: usize,
    pending: Vec<f32>,
    in_speech: bool,
    silent_frames: usize,
}

impl SpeechTracker {
    /// `end_silence` is how long the speaker must stay quiet after talking
    /// before [`SpeechEdge::Ended`] is reported.
    pub fn new(rms_threshold: f32, end_silence: Duration) -> Self {
        let frames = end_silence.as_millis().div_ceil(FRAME_DURATION.as_millis()) as usize;
        Self {
            vad: VadDetector::new(rms_threshold),
            end_silence_frames: frames.max(1),
            pending: Vec::with_capacity(FRAME_SAMPLES),
            in_speech: false,
            silent_frames: 0,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Classify every complete frame in `pending + samples` and report the
    /// edges crossed, in order.  A trailing partial frame is kept for the
    /// next call.
    pub fn feed(&mut self, samples: &[f32]) -> Vec<SpeechEdge> {
        self.pending.extend_from_slice(samples);
        let mut edges = Vec::new();

        let whole = self.pending.len() / FRAME_SAMPLES * FRAME_SAMPLES;
        for frame in self.pending[..whole].chunks_exact(FRAME_SAMPLES) {
            let voice = self.vad.is_voice(frame);
            if voice {
                self.silent_frames = 0;
                if !self.in_speech {
                    self.in_speech = true;
                    edges.push(SpeechEdge::Started);
                }
            } else if self.in_speech {
                self.silent_frames += 1;
                if self.silent_frames >= self.end_silence_frames {
                    self.in_speech = false;
                    self.silent_frames = 0;
                    edges.push(SpeechEdge::Ended);
                }
            }
        }
        self.pending.drain(..whole);
        edges
    }

    /// Forget any partial frame and speech in progress.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.in_speech = false;
        self.silent_frames = 0;
    }
}

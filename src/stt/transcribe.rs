//! Whisper run parameters and results.

/// Owned mirror of `whisper_rs::SamplingStrategy`.
///
/// Drill answers are a few words long, so greedy decoding is the default;
/// beam search buys little accuracy for several times the latency.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    Greedy { best_of: i32 },
    BeamSearch { beam_size: i32, patience: f32 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Greedy { best_of: 1 }
    }
}

/// Settings for one transcription.
///
/// ```
/// use speech_drill::stt::TranscribeParams;
///
/// let params = TranscribeParams {
///     language: "en".into(),
///     ..TranscribeParams::default()
/// };
/// assert_eq!(params.language, "en");
/// ```
#[derive(Debug, Clone)]
pub struct TranscribeParams {
    /// ISO-639-1 code, or `"auto"` for Whisper's own detection.
    pub language: String,
    pub strategy: SamplingStrategy,
    pub n_threads: i32,
    /// Silence whisper.cpp's progress printing on stderr.
    pub suppress_progress: bool,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self {
            language: "ko".into(),
            strategy: SamplingStrategy::default(),
            n_threads: optimal_threads(),
            suppress_progress: true,
        }
    }
}

/// Available parallelism, capped at 8 where Whisper stops scaling.
pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Concatenated segment text, trimmed.
    pub text: String,
    /// Mean probability of the text tokens, 0.0 – 1.0.
    pub confidence: f32,
    /// Wall-clock inference time.
    pub inference_ms: u128,
}

impl TranscriptionResult {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            inference_ms: 0,
        }
    }
}

/// Mean of `probs`, clamped to 0..=1; zero when there are none.
pub(crate) fn mean_confidence(probs: &[f32]) -> f32 {
    if probs.is_empty() {
        return 0.0;
    }
    (probs.iter().sum::<f32>() / probs.len() as f32).clamp(0.0, 1.0)
}

//! Speech-to-text engine.
//!
//! [`SttEngine`] is the seam the recognizer adapter talks to; it is
//! object-safe and `Send + Sync` so one loaded model can be shared behind an
//! `Arc<dyn SttEngine>` and called from the blocking pool.
//!
//! [`WhisperEngine`] wraps a `whisper_rs::WhisperContext`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters};

use super::transcribe::{mean_confidence, SamplingStrategy, TranscribeParams, TranscriptionResult};

#[derive(Debug, Clone, Error)]
pub enum SttError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Whisper context initialisation failed: {0}")]
    ContextInit(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Audio too long: maximum 60 s (960 000 samples at 16 kHz)")]
    AudioTooLong,
}

/// Transcribes 16 kHz mono `f32` audio.
///
/// Clips shorter than [`MIN_AUDIO_SAMPLES`] are padded with trailing silence
/// rather than rejected, because one-word answers are common.
pub trait SttEngine: Send + Sync {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SttEngine>) {}
};

/// Whisper refuses anything under one second of context; 0.5 s of padding
/// on top of a short word is enough in practice.
pub const MIN_AUDIO_SAMPLES: usize = 8_000;
pub const MAX_AUDIO_SAMPLES: usize = 960_000;

/// `audio` padded with zeros up to [`MIN_AUDIO_SAMPLES`].
pub fn pad_to_minimum(audio: &[f32]) -> Vec<f32> {
    let mut out = audio.to_vec();
    if out.len() < MIN_AUDIO_SAMPLES {
        out.resize(MIN_AUDIO_SAMPLES, 0.0);
    }
    out
}

/// Resolve a configured model: an existing path is used as is, anything else
/// is treated as a name under `models_dir` (`ggml-<name>.bin`).
pub fn resolve_model_path(models_dir: &Path, model: &str) -> PathBuf {
    let as_path = Path::new(model);
    if as_path.is_file() {
        return as_path.to_path_buf();
    }
    models_dir.join(format!("ggml-{model}.bin"))
}

// ---------------------------------------------------------------------------
// WhisperEngine
// ---------------------------------------------------------------------------

/// A fresh `WhisperState` is created per call, so the engine needs no
/// locking.
pub struct WhisperEngine {
    ctx: WhisperContext,
    params: TranscribeParams,
}

impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs; the model
// weights are read-only after loading.
unsafe impl Send for WhisperEngine {}
unsafe impl Sync for WhisperEngine {}

impl WhisperEngine {
    pub fn load(
        model_path: impl AsRef<Path>,
        params: TranscribeParams,
        use_gpu: bool,
    ) -> Result<Self, SttError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(SttError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path.to_str().ok_or_else(|| {
            SttError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.use_gpu(use_gpu);
        let ctx = WhisperContext::new_with_params(path_str, ctx_params)
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        log::info!("stt: loaded model {}", path.display());
        Ok(Self { ctx, params })
    }

    fn full_params(&self) -> FullParams<'_, '_> {
        use whisper_rs::SamplingStrategy as WS;
        let strategy = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch {
                beam_size,
                patience,
            } => WS::BeamSearch {
                beam_size,
                patience,
            },
        };

        let mut fp = FullParams::new(strategy);
        let lang = (self.params.language != "auto").then_some(self.params.language.as_str());
        fp.set_language(lang);
        fp.set_n_threads(self.params.n_threads);
        fp.set_single_segment(true);
        if self.params.suppress_progress {
            fp.set_print_progress(false);
            fp.set_print_realtime(false);
        }
        fp
    }
}

impl SttEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError> {
        if audio.len() > MAX_AUDIO_SAMPLES {
            return Err(SttError::AudioTooLong);
        }
        let audio = pad_to_minimum(audio);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        let wall_start = std::time::Instant::now();
        state
            .full(self.full_params(), &audio)
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| SttError::Transcription(e.to_string()))?;

        let mut text = String::new();
        let mut probs = Vec::new();
        for seg in 0..n_segments {
            let seg_text = state
                .full_get_segment_text(seg)
                .map_err(|e| SttError::Transcription(format!("segment {seg}: {e}")))?;
            text.push_str(&seg_text);

            let n_tokens = state.full_n_tokens(seg).unwrap_or(0);
            for tok in 0..n_tokens {
                // Timestamp and control tokens render as "[_…]".
                let is_control = state
                    .full_get_token_text(seg, tok)
                    .map(|t| t.starts_with("[_"))
                    .unwrap_or(true);
                if is_control {
                    continue;
                }
                if let Ok(p) = state.full_get_token_prob(seg, tok) {
                    probs.push(p);
                }
            }
        }

        let text = text.trim().to_string();
        let confidence = if text.is_empty() {
            0.0
        } else {
            mean_confidence(&probs)
        };

        Ok(TranscriptionResult {
            text,
            confidence,
            inference_ms: wall_start.elapsed().as_millis(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockSttEngine  (test-only)
// ---------------------------------------------------------------------------

/// Returns a fixed response and records the length of every clip it saw.
#[cfg(test)]
pub struct MockSttEngine {
    response: Result<TranscriptionResult, SttError>,
    pub seen_lengths: std::sync::Mutex<Vec<usize>>,
}

#[cfg(test)]
impl MockSttEngine {
    pub fn ok(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            response: Ok(TranscriptionResult {
                text: text.into(),
                confidence,
                inference_ms: 1,
            }),
            seen_lengths: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn err(error: SttError) -> Self {
        Self {
            response: Err(error),
            seen_lengths: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl SttEngine for MockSttEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<TranscriptionResult, SttError> {
        if audio.len() > MAX_AUDIO_SAMPLES {
            return Err(SttError::AudioTooLong);
        }
        self.seen_lengths.lock().unwrap().push(audio.len());
        self.response.clone()
    }
}

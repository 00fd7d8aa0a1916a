//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every section is
//! `#[serde(default)]`, so a hand-written file only needs the keys it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::session::DifficultyLevel;

use super::AppPaths;

// ---------------------------------------------------------------------------
// SessionSettings
// ---------------------------------------------------------------------------

/// Difficulty and optional per-field overrides of the tier timings.
///
/// Any override left as `None` keeps the value of the selected tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub difficulty: DifficultyLevel,
    pub think_time_ms: Option<u64>,
    pub record_time_ms: Option<u64>,
    pub prompt_delay_ms: Option<u64>,
    pub beep_duration_ms: Option<u64>,
    pub pre_roll_ms: Option<u64>,
    pub grace_late_ms: Option<u64>,
    pub answer_wait_ms: Option<u64>,
    pub enable_vad: Option<bool>,
    /// RMS level (0.0 – 1.0) above which a frame counts as speech.
    pub vad_threshold: Option<f32>,
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Text-to-speech command settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// TTS program; `None` picks `say` on macOS and `espeak-ng` elsewhere.
    pub program: Option<String>,
    /// Engine-specific voice name.
    pub voice: Option<String>,
    /// Speaking rate in words per minute.
    pub rate_wpm: Option<u32>,
    /// Language of prompts and answers as an ISO-639-1 code.
    pub language: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            program: None,
            voice: None,
            rate_wpm: None,
            language: "ko".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ToneConfig
// ---------------------------------------------------------------------------

/// Cue beep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub frequency_hz: f32,
    /// Output gain, 0.0 – 1.0.
    pub volume: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 880.0,
            volume: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for audio capture and end-of-speech detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Upper bound on one recorded answer; older audio is overwritten.
    pub max_recording_secs: u32,
    /// Trailing silence that ends an answer.
    pub end_silence_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            max_recording_secs: 60,
            end_silence_ms: 800,
        }
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Settings for the Whisper STT engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// GGML model name / file stem (e.g. `"base"` for `ggml-base.bin`), or
    /// a path to a model file.
    pub model: String,
    /// Answer language as an ISO-639-1 code, or `"auto"` for Whisper's
    /// built-in language detection.
    pub language: String,
    /// Attempt GPU-accelerated inference when available.
    pub use_gpu: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "base".into(),
            language: "ko".into(),
            use_gpu: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use speech_drill::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Difficulty tier and timing overrides.
    pub session: SessionSettings,
    /// Text-to-speech settings.
    pub synthesis: SynthesisConfig,
    /// Cue tone settings.
    pub tone: ToneConfig,
    /// Audio capture settings.
    pub audio: AudioConfig,
    /// STT engine settings.
    pub stt: SttConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns `true` when no `settings.toml` file exists yet.
    pub fn is_first_run() -> bool {
        !AppPaths::new().settings_file.exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Difficulty tiers and session construction.
//!
//! [`SessionFactory::create`] refuses to hand out a session unless every
//! adapter reports itself available, so a missing microphone or model is
//! reported up front instead of halfway through a drill.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::{
    AdapterKind, Adapters, CommandSynthesizer, CpalRecorder, CpalTonePlayer, SpeakOptions,
    WhisperRecognizer,
};
use crate::config::{AppConfig, AppPaths, SessionSettings};
use crate::audio::TARGET_RATE;
use crate::stt::{
    resolve_model_path, SttEngine, TranscribeParams, WhisperEngine, MAX_AUDIO_SAMPLES,
};

use super::events::{self, SessionError, SessionEvents};
use super::orchestrator::Session;

// ---------------------------------------------------------------------------
// DifficultyLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 3] = [
        DifficultyLevel::Beginner,
        DifficultyLevel::Intermediate,
        DifficultyLevel::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Intermediate => "intermediate",
            DifficultyLevel::Advanced => "advanced",
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown difficulty '{s}' (beginner, intermediate, advanced)"))
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timing and tuning for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Countdown between the prompt and the cue tone.
    pub think_time: Duration,
    /// Budget for the spoken answer.
    pub record_time: Duration,
    /// Silence before the prompt is spoken.
    pub prompt_delay: Duration,
    pub beep_duration: Duration,
    /// End the recording as soon as the speaker falls silent.
    pub enable_vad: bool,
    pub vad_threshold: f32,
    /// Capture that runs before the record budget starts counting.
    pub pre_roll_time: Duration,
    /// One extension granted when the budget runs out mid-sentence.
    pub grace_late_time: Duration,
    /// How long the timeout phase waits for `play_answer_and_next`.
    pub answer_wait: Duration,
    /// Trailing silence that ends an answer.
    pub end_silence: Duration,
    pub cue_frequency_hz: f32,
    pub speak: SpeakOptions,
}

impl SessionConfig {
    /// Tier defaults.
    pub fn for_level(level: DifficultyLevel) -> Self {
        let ms = Duration::from_millis;
        let (think, record, prompt_delay, beep, pre_roll, grace) = match level {
            DifficultyLevel::Beginner => (ms(5_000), ms(15_000), ms(500), ms(300), ms(200), ms(1_500)),
            DifficultyLevel::Intermediate => (ms(3_000), ms(10_000), ms(300), ms(250), ms(200), ms(1_000)),
            DifficultyLevel::Advanced => (ms(1_500), ms(6_000), ms(200), ms(200), ms(150), ms(500)),
        };
        Self {
            think_time: think,
            record_time: record,
            prompt_delay,
            beep_duration: beep,
            enable_vad: true,
            vad_threshold: 0.02,
            pre_roll_time: pre_roll,
            grace_late_time: grace,
            answer_wait: ms(3_000),
            end_silence: ms(800),
            cue_frequency_hz: 880.0,
            speak: SpeakOptions::default(),
        }
    }

    /// Overlay the fields set in `settings`.
    pub fn with_overrides(mut self, settings: &SessionSettings) -> Self {
        let ms = Duration::from_millis;
        if let Some(v) = settings.think_time_ms {
            self.think_time = ms(v);
        }
        if let Some(v) = settings.record_time_ms {
            self.record_time = ms(v);
        }
        if let Some(v) = settings.prompt_delay_ms {
            self.prompt_delay = ms(v);
        }
        if let Some(v) = settings.beep_duration_ms {
            self.beep_duration = ms(v);
        }
        if let Some(v) = settings.pre_roll_ms {
            self.pre_roll_time = ms(v);
        }
        if let Some(v) = settings.grace_late_ms {
            self.grace_late_time = ms(v);
        }
        if let Some(v) = settings.answer_wait_ms {
            self.answer_wait = ms(v);
        }
        if let Some(v) = settings.enable_vad {
            self.enable_vad = v;
        }
        if let Some(v) = settings.vad_threshold {
            self.vad_threshold = v;
        }
        self.limit_take(max_take())
    }

    /// Shorten `record_time` so that pre-roll, the record budget and the
    /// grace extension together fit in `max`.
    pub fn limit_take(mut self, max: Duration) -> Self {
        let take = self.pre_roll_time + self.record_time + self.grace_late_time;
        if take > max {
            let record_time = max.saturating_sub(self.pre_roll_time + self.grace_late_time);
            log::warn!(
                "config: record time {:?} exceeds the {:?} take limit, using {:?}",
                self.record_time,
                max,
                record_time
            );
            self.record_time = record_time;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SessionFactory
// ---------------------------------------------------------------------------

/// Builds a fresh adapter set for one session.
type BuildAdapters = dyn Fn() -> Result<Adapters, SessionError> + Send + Sync;

/// Hands out sessions that each own their adapters, so tearing one session
/// down never touches the microphone or playback of another.
pub struct SessionFactory {
    build: Box<BuildAdapters>,
    overrides: SessionSettings,
    speak: SpeakOptions,
    cue_frequency_hz: f32,
    end_silence: Duration,
    max_take: Duration,
}

impl SessionFactory {
    /// Factory that calls `build` once per session, with pure tier timings.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> Adapters + Send + Sync + 'static,
    {
        Self::with_builder(Box::new(move || -> Result<Adapters, SessionError> { Ok(build()) }))
    }

    fn with_builder(build: Box<BuildAdapters>) -> Self {
        Self {
            build,
            overrides: SessionSettings::default(),
            speak: SpeakOptions::default(),
            cue_frequency_hz: 880.0,
            end_silence: Duration::from_millis(800),
            max_take: max_take(),
        }
    }

    /// Production adapters built from the application configuration.
    ///
    /// The Whisper model is loaded once here and shared; everything else is
    /// built per session.  A model that fails to load leaves the recognizer
    /// unavailable rather than failing here; [`create`](Self::create)
    /// reports it.
    pub fn from_config(config: &AppConfig) -> Self {
        let model_path = resolve_model_path(&AppPaths::new().models_dir, &config.stt.model);
        let params = TranscribeParams {
            language: config.stt.language.clone(),
            ..TranscribeParams::default()
        };
        let engine: Result<Arc<dyn SttEngine>, String> =
            match WhisperEngine::load(&model_path, params, config.stt.use_gpu) {
                Ok(engine) => Ok(Arc::new(engine) as Arc<dyn SttEngine>),
                Err(e) => {
                    log::warn!("factory: {e}");
                    Err(e.to_string())
                }
            };

        let max_recording_secs = config.audio.max_recording_secs;
        let program = config.synthesis.program.clone();
        let volume = config.tone.volume;
        let build = move || -> Result<Adapters, SessionError> {
            let recorder =
                CpalRecorder::new(max_recording_secs).map_err(|e| SessionError::adapter(&e))?;
            let feed = recorder.feed();
            let recognizer = match &engine {
                Ok(engine) => WhisperRecognizer::new(Arc::clone(engine), feed),
                Err(reason) => WhisperRecognizer::unavailable(reason.clone(), feed),
            };
            Ok(Adapters {
                synthesizer: Arc::new(CommandSynthesizer::new(program.clone())),
                tone: Arc::new(CpalTonePlayer::new(volume)),
                recorder: Arc::new(recorder),
                recognizer: Arc::new(recognizer),
            })
        };

        let mut factory = Self::with_builder(Box::new(build));
        factory.overrides = config.session.clone();
        factory.speak = SpeakOptions {
            language: Some(config.synthesis.language.clone()),
            voice: config.synthesis.voice.clone(),
            rate_wpm: config.synthesis.rate_wpm,
        };
        factory.cue_frequency_hz = config.tone.frequency_hz;
        factory.end_silence = Duration::from_millis(config.audio.end_silence_ms);
        factory.max_take = factory
            .max_take
            .min(Duration::from_secs(u64::from(max_recording_secs)));
        factory
    }

    pub fn with_overrides(mut self, overrides: SessionSettings) -> Self {
        self.overrides = overrides;
        self
    }

    /// Fail with a capability error naming every missing adapter.
    pub fn check_capabilities(&self) -> Result<(), SessionError> {
        check(&(self.build)()?)
    }

    /// Effective configuration for `level`: tier defaults, then overrides.
    pub fn config_for(&self, level: DifficultyLevel) -> SessionConfig {
        let mut config = SessionConfig::for_level(level)
            .with_overrides(&self.overrides)
            .limit_take(self.max_take);
        config.speak = self.speak.clone();
        config.cue_frequency_hz = self.cue_frequency_hz;
        config.end_silence = self.end_silence;
        config
    }

    /// A ready session plus its event stream.  Must be called inside a tokio
    /// runtime; the session keeps a handle to it.
    pub fn create(&self, level: DifficultyLevel) -> Result<(Session, SessionEvents), SessionError> {
        let adapters = (self.build)()?;
        check(&adapters)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SessionError::capability("a tokio runtime is required to run a session")
        })?;

        let (sink, events) = events::channel();
        let session = Session::new(
            adapters,
            self.config_for(level),
            level,
            sink,
            runtime,
        );
        log::info!("factory: {level} session ready");
        Ok((session, events))
    }
}

fn check(adapters: &Adapters) -> Result<(), SessionError> {
    let missing = adapters.missing_capabilities();
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = missing.iter().map(AdapterKind::to_string).collect();
    Err(SessionError::capability(format!(
        "missing capabilities: {}",
        names.join(", ")
    )))
}

/// Longest take Whisper accepts in one transcription.
fn max_take() -> Duration {
    Duration::from_secs((MAX_AUDIO_SAMPLES / TARGET_RATE as usize) as u64)
}

//! Scripted in-memory adapters for tests.
//!
//! Every fake runs on tokio time, so tests using
//! `#[tokio::test(start_paused = true)]` drive them deterministically with
//! `tokio::time::advance` or auto-advance.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::control::{wait_unpaused, Playback, PlaybackControl};
use super::{
    AdapterError, AdapterKind, CapturedAudio, ListenOptions, RecognitionEvent, Recognizer,
    Recorder, SpeakOptions, Synthesizer, TonePlayer, Transcript,
};

/// Sleep `total` of tokio time, frozen while the signal is `Paused`.
/// Returns `false` if cancelled first.
async fn pausable_sleep(total: Duration, rx: &mut watch::Receiver<Playback>) -> bool {
    let mut remaining = total;
    loop {
        if wait_unpaused(rx).await == Playback::Cancelled {
            return false;
        }
        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(remaining) => return true,
            _ = rx.changed() => {
                remaining = remaining.saturating_sub(started.elapsed());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FakeSynthesizer
// ---------------------------------------------------------------------------

pub struct FakeSynthesizer {
    duration: Duration,
    failure: Option<String>,
    available: bool,
    control: PlaybackControl,
    spoken: Mutex<Vec<String>>,
    pauses: AtomicUsize,
}

impl FakeSynthesizer {
    /// Speaks every utterance in 500 ms.
    pub fn new() -> Self {
        Self {
            duration: Duration::from_millis(500),
            failure: None,
            available: true,
            control: PlaybackControl::new(),
            spoken: Mutex::new(Vec::new()),
            pauses: AtomicUsize::new(0),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Every `speak` fails with `reason`.
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Texts passed to `speak`, in call order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn speak(&self, text: &str, _opts: &SpeakOptions) -> Result<(), AdapterError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if let Some(reason) = &self.failure {
            return Err(AdapterError::failed(AdapterKind::Synthesis, reason.clone()));
        }
        let (_, mut rx) = self.control.begin();
        pausable_sleep(self.duration, &mut rx).await;
        Ok(())
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.control.pause();
    }

    fn resume(&self) {
        self.control.resume();
    }

    fn cancel(&self) {
        self.control.cancel();
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ---------------------------------------------------------------------------
// FakeTonePlayer
// ---------------------------------------------------------------------------

pub struct FakeTonePlayer {
    available: bool,
    control: PlaybackControl,
    played: Mutex<Vec<(f32, Duration)>>,
    stops: AtomicUsize,
}

impl FakeTonePlayer {
    pub fn new() -> Self {
        Self {
            available: true,
            control: PlaybackControl::new(),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn played(&self) -> Vec<(f32, Duration)> {
        self.played.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TonePlayer for FakeTonePlayer {
    async fn play(&self, frequency_hz: f32, duration: Duration) -> Result<(), AdapterError> {
        self.played.lock().unwrap().push((frequency_hz, duration));
        let (_, mut rx) = self.control.begin();
        pausable_sleep(duration, &mut rx).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.control.cancel();
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ---------------------------------------------------------------------------
// FakeRecorder
// ---------------------------------------------------------------------------

pub struct FakeRecorder {
    samples: Vec<f32>,
    start_failure: Option<String>,
    available: bool,
    recording: AtomicBool,
    starts: AtomicUsize,
    releases: AtomicUsize,
    pauses: AtomicUsize,
}

impl FakeRecorder {
    /// Hands back one second of low-level noise from every take.
    pub fn new() -> Self {
        Self {
            samples: vec![0.05; 16_000],
            start_failure: None,
            available: true,
            recording: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
        }
    }

    pub fn failing_start(mut self, reason: &str) -> Self {
        self.start_failure = Some(reason.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn start(&self) -> Result<(), AdapterError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.start_failure {
            return Err(AdapterError::failed(AdapterKind::Recorder, reason.clone()));
        }
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {}

    async fn stop(&self) -> Result<CapturedAudio, AdapterError> {
        let was_recording = self.recording.swap(false, Ordering::SeqCst);
        Ok(CapturedAudio {
            samples: if was_recording { self.samples.clone() } else { Vec::new() },
            sample_rate: 16_000,
        })
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// ---------------------------------------------------------------------------
// FakeRecognizer
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Script {
    text: String,
    confidence: f32,
    starts_after: Duration,
    ends_after: Option<Duration>,
}

pub struct FakeRecognizer {
    script: Option<Script>,
    stop_failure: Option<String>,
    available: bool,
    paused: Arc<AtomicBool>,
    heard: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_delay: Duration,
}

impl FakeRecognizer {
    fn build(script: Option<Script>) -> Self {
        Self {
            script,
            stop_failure: None,
            available: true,
            paused: Arc::new(AtomicBool::new(false)),
            heard: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            stop_delay: Duration::ZERO,
        }
    }

    /// Nobody ever speaks.
    pub fn silent() -> Self {
        Self::build(None)
    }

    /// The speaker starts `starts_after` into listening and stops
    /// `ends_after` into listening.
    pub fn speaking(text: &str, confidence: f32, starts_after: Duration, ends_after: Duration) -> Self {
        Self::build(Some(Script {
            text: text.to_string(),
            confidence,
            starts_after,
            ends_after: Some(ends_after),
        }))
    }

    /// The speaker starts and never falls silent.
    pub fn rambling(text: &str, starts_after: Duration) -> Self {
        Self::build(Some(Script {
            text: text.to_string(),
            confidence: 0.5,
            starts_after,
            ends_after: None,
        }))
    }

    /// `stop_listening` takes `delay` of tokio time to produce a transcript.
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn failing_stop(mut self, reason: &str) -> Self {
        self.stop_failure = Some(reason.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn abort_task(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn start_listening(
        &self,
        _opts: &ListenOptions,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, AdapterError> {
        self.abort_task();
        self.heard.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(script) = self.script.clone() {
            let paused = Arc::clone(&self.paused);
            let heard = Arc::clone(&self.heard);
            let task = tokio::spawn(async move {
                let began = Instant::now();
                tokio::time::sleep(script.starts_after).await;
                if paused.load(Ordering::SeqCst) {
                    return;
                }
                heard.store(true, Ordering::SeqCst);
                let _ = tx.send(RecognitionEvent::SpeechStarted);

                let Some(ends_after) = script.ends_after else {
                    // Keep the channel open.
                    std::future::pending::<()>().await;
                    return;
                };
                tokio::time::sleep_until(began + ends_after).await;
                if !paused.load(Ordering::SeqCst) {
                    let _ = tx.send(RecognitionEvent::SpeechEnded);
                }
                std::future::pending::<()>().await;
            });
            *self.task.lock().unwrap() = Some(task);
        }
        Ok(rx)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn stop_listening(&self) -> Result<Transcript, AdapterError> {
        self.abort_task();
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        if let Some(reason) = &self.stop_failure {
            return Err(AdapterError::failed(AdapterKind::Recognizer, reason.clone()));
        }
        match &self.script {
            Some(script) if self.heard.swap(false, Ordering::SeqCst) => Ok(Transcript {
                text: script.text.clone(),
                confidence: script.confidence,
            }),
            _ => Ok(Transcript::empty()),
        }
    }

    fn cancel(&self) {
        self.abort_task();
        self.heard.store(false, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

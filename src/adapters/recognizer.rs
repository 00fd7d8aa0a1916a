//! Whisper recognizer fed from the recorder's live audio.
//!
//! While listening, a tokio task follows the [`AudioFeed`], keeps the audio
//! heard so far and runs a [`SpeechTracker`] over it to report the start and
//! end of the answer.  `stop_listening` lets the task drain the chunks still
//! queued on the feed, then trims the silence and transcribes on the
//! blocking pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{SpeechEdge, SpeechTracker, VadDetector};
use crate::stt::SttEngine;

use super::recorder::AudioFeed;
use super::{AdapterError, AdapterKind, ListenOptions, RecognitionEvent, Recognizer, Transcript};

struct Listening {
    task: JoinHandle<()>,
    /// Ends the task after it has drained the feed.
    stop: CancellationToken,
    heard: Arc<Mutex<Vec<f32>>>,
    vad_threshold: f32,
}

pub struct WhisperRecognizer {
    engine: Result<Arc<dyn SttEngine>, String>,
    feed: AudioFeed,
    paused: Arc<AtomicBool>,
    listening: Mutex<Option<Listening>>,
}

impl WhisperRecognizer {
    pub fn new(engine: Arc<dyn SttEngine>, feed: AudioFeed) -> Self {
        Self::with_engine(Ok(engine), feed)
    }

    /// A recognizer whose model failed to load; reports itself unavailable.
    pub fn unavailable(reason: impl Into<String>, feed: AudioFeed) -> Self {
        Self::with_engine(Err(reason.into()), feed)
    }

    fn with_engine(engine: Result<Arc<dyn SttEngine>, String>, feed: AudioFeed) -> Self {
        Self {
            engine,
            feed,
            paused: Arc::new(AtomicBool::new(false)),
            listening: Mutex::new(None),
        }
    }

    fn take_listening(&self) -> Option<Listening> {
        self.listening.lock().ok().and_then(|mut slot| slot.take())
    }
}

struct Follower {
    tracker: SpeechTracker,
    heard: Arc<Mutex<Vec<f32>>>,
    paused: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
}

impl Follower {
    fn absorb(&mut self, chunk: &[f32]) {
        if self.paused.load(Ordering::SeqCst) {
            self.tracker.reset();
            return;
        }

        if let Ok(mut buf) = self.heard.lock() {
            buf.extend_from_slice(chunk);
        }
        for edge in self.tracker.feed(chunk) {
            let event = match edge {
                SpeechEdge::Started => RecognitionEvent::SpeechStarted,
                SpeechEdge::Ended => RecognitionEvent::SpeechEnded,
            };
            log::debug!("recognizer: {event:?}");
            let _ = self.events.send(event);
        }
    }
}

async fn follow_feed(
    mut feed: broadcast::Receiver<Arc<[f32]>>,
    mut follower: Follower,
    stop: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            received = feed.recv() => received,
        };
        match received {
            Ok(chunk) => follower.absorb(&chunk),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("recognizer: fell behind, {n} chunks lost");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    // Audio the recorder published before it stopped belongs to the take.
    loop {
        match feed.try_recv() {
            Ok(chunk) => follower.absorb(&chunk),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                log::warn!("recognizer: fell behind, {n} chunks lost");
            }
            Err(_) => return,
        }
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    async fn start_listening(
        &self,
        opts: &ListenOptions,
    ) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, AdapterError> {
        if let Err(reason) = &self.engine {
            return Err(AdapterError::unavailable(AdapterKind::Recognizer, reason.clone()));
        }
        self.cancel();
        self.paused.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let heard = Arc::new(Mutex::new(Vec::new()));
        let stop = CancellationToken::new();
        let follower = Follower {
            tracker: SpeechTracker::new(opts.vad_threshold, opts.end_silence),
            heard: Arc::clone(&heard),
            paused: Arc::clone(&self.paused),
            events: tx,
        };
        let task = tokio::spawn(follow_feed(self.feed.subscribe(), follower, stop.clone()));

        let mut slot = self
            .listening
            .lock()
            .map_err(|_| AdapterError::failed(AdapterKind::Recognizer, "state lock poisoned"))?;
        *slot = Some(Listening {
            task,
            stop,
            heard,
            vad_threshold: opts.vad_threshold,
        });
        Ok(rx)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn stop_listening(&self) -> Result<Transcript, AdapterError> {
        let Some(listening) = self.take_listening() else {
            return Ok(Transcript::empty());
        };
        listening.stop.cancel();
        if let Err(e) = listening.task.await {
            log::warn!("recognizer: feed task ended abnormally: {e}");
        }

        let audio = listening
            .heard
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let voiced = VadDetector::new(listening.vad_threshold).trim_silence(&audio).to_vec();
        if voiced.is_empty() {
            log::debug!("recognizer: nothing but silence");
            return Ok(Transcript::empty());
        }

        let engine = match &self.engine {
            Ok(engine) => Arc::clone(engine),
            Err(reason) => {
                return Err(AdapterError::unavailable(AdapterKind::Recognizer, reason.clone()))
            }
        };

        let result = tokio::task::spawn_blocking(move || engine.transcribe(&voiced))
            .await
            .map_err(|e| AdapterError::failed(AdapterKind::Recognizer, e.to_string()))?
            .map_err(|e| AdapterError::failed(AdapterKind::Recognizer, e.to_string()))?;

        log::info!(
            "recognizer: \"{}\" (confidence {:.2}, {} ms)",
            result.text,
            result.confidence,
            result.inference_ms
        );
        Ok(Transcript {
            text: result.text,
            confidence: result.confidence,
        })
    }

    fn cancel(&self) {
        if let Some(listening) = self.take_listening() {
            listening.task.abort();
        }
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.engine.is_ok()
    }
}

//! Microphone recorder backed by a dedicated capture thread.
//!
//! `cpal::Stream` cannot leave the thread that built it, so one thread owns
//! the device for the recorder's whole life and is driven by commands.  The
//! device is opened on the first `start` and kept until `release`.
//!
//! Every converted chunk (16 kHz mono) goes two ways: into the bounded take
//! buffer returned by `stop`, and out on the [`AudioFeed`] broadcast that the
//! recognizer listens to.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::audio::{input_available, AudioChunk, InputDevice, RingBuffer, StreamHandle, TARGET_RATE};

use super::{AdapterError, AdapterKind, CapturedAudio, Recorder};

const FEED_CAPACITY: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// AudioFeed
// ---------------------------------------------------------------------------

/// Live 16 kHz mono audio published while a take is recording.
#[derive(Clone)]
pub struct AudioFeed {
    tx: broadcast::Sender<Arc<[f32]>>,
}

impl AudioFeed {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<[f32]>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, samples: Arc<[f32]>) {
        // No subscribers is fine.
        let _ = self.tx.send(samples);
    }
}

impl Default for AudioFeed {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Capture thread
// ---------------------------------------------------------------------------

enum Command {
    Start(oneshot::Sender<Result<(), AdapterError>>),
    Pause,
    Resume,
    Stop(oneshot::Sender<CapturedAudio>),
    Release,
    Shutdown,
}

struct CaptureThread {
    feed: AudioFeed,
    take: RingBuffer,
    device: Option<InputDevice>,
    stream: Option<StreamHandle>,
    chunk_tx: std_mpsc::Sender<AudioChunk>,
    chunk_rx: std_mpsc::Receiver<AudioChunk>,
    recording: bool,
    paused: bool,
}

impl CaptureThread {
    fn run(mut self, commands: std_mpsc::Receiver<Command>) {
        loop {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(Command::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                Ok(cmd) => self.handle(cmd),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            }
            self.pump();
        }
        self.release();
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Pause => {
                if self.recording && !self.paused {
                    self.paused = true;
                    self.pause_stream();
                }
            }
            Command::Resume => {
                if self.recording && self.paused {
                    self.paused = false;
                    self.resume_stream();
                }
            }
            Command::Stop(reply) => {
                self.pump();
                let samples = if self.recording { self.take.drain() } else { Vec::new() };
                self.recording = false;
                self.paused = false;
                self.pause_stream();
                let _ = reply.send(CapturedAudio {
                    samples,
                    sample_rate: TARGET_RATE,
                });
            }
            Command::Release => self.release(),
            Command::Shutdown => {}
        }
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if self.device.is_none() {
            let device = InputDevice::open_default()
                .map_err(|e| AdapterError::unavailable(AdapterKind::Recorder, e.to_string()))?;
            self.device = Some(device);
        }
        if let Some(stream) = &self.stream {
            stream
                .resume()
                .map_err(|e| AdapterError::failed(AdapterKind::Recorder, e.to_string()))?;
        } else if let Some(device) = &self.device {
            let stream = device
                .start(self.chunk_tx.clone())
                .map_err(|e| AdapterError::failed(AdapterKind::Recorder, e.to_string()))?;
            self.stream = Some(stream);
        }
        // Anything delivered before this take belongs to nobody.
        while self.chunk_rx.try_recv().is_ok() {}
        self.take.clear();
        self.recording = true;
        self.paused = false;
        log::debug!("recorder: take started");
        Ok(())
    }

    fn pump(&mut self) {
        while let Ok(chunk) = self.chunk_rx.try_recv() {
            if !self.recording || self.paused {
                continue;
            }
            let mono = chunk.to_mono_16k();
            self.take.push_slice(&mono);
            self.feed.publish(mono.into());
        }
    }

    fn pause_stream(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                log::warn!("recorder: {e}");
            }
        }
    }

    fn resume_stream(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.resume() {
                log::warn!("recorder: {e}");
            }
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() || self.device.take().is_some() {
            log::debug!("recorder: microphone released");
        }
        self.device = None;
        self.recording = false;
        self.paused = false;
        self.take.clear();
    }
}

// ---------------------------------------------------------------------------
// CpalRecorder
// ---------------------------------------------------------------------------

pub struct CpalRecorder {
    commands: Mutex<std_mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
    feed: AudioFeed,
}

impl CpalRecorder {
    /// `max_take_secs` bounds the memory held for one answer.
    pub fn new(max_take_secs: u32) -> Result<Self, AdapterError> {
        let feed = AudioFeed::new();
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let worker_feed = feed.clone();

        // Built on the thread itself: the stream it will own is not `Send`.
        let thread = std::thread::Builder::new()
            .name("speech-drill-capture".into())
            .spawn(move || {
                let (chunk_tx, chunk_rx) = std_mpsc::channel();
                CaptureThread {
                    feed: worker_feed,
                    take: RingBuffer::with_duration(max_take_secs, TARGET_RATE),
                    device: None,
                    stream: None,
                    chunk_tx,
                    chunk_rx,
                    recording: false,
                    paused: false,
                }
                .run(cmd_rx)
            })
            .map_err(|e| AdapterError::failed(AdapterKind::Recorder, e.to_string()))?;

        Ok(Self {
            commands: Mutex::new(cmd_tx),
            thread: Some(thread),
            feed,
        })
    }

    /// Feed to hand to the recognizer.
    pub fn feed(&self) -> AudioFeed {
        self.feed.clone()
    }

    fn send(&self, cmd: Command) -> Result<(), AdapterError> {
        let tx = self
            .commands
            .lock()
            .map_err(|_| AdapterError::failed(AdapterKind::Recorder, "command lock poisoned"))?;
        tx.send(cmd)
            .map_err(|_| AdapterError::failed(AdapterKind::Recorder, "capture thread stopped"))
    }
}

impl Drop for CpalRecorder {
    fn drop(&mut self) {
        let _ = self.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[async_trait]
impl Recorder for CpalRecorder {
    async fn start(&self) -> Result<(), AdapterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply))?;
        rx.await
            .map_err(|_| AdapterError::failed(AdapterKind::Recorder, "capture thread stopped"))?
    }

    fn pause(&self) {
        let _ = self.send(Command::Pause);
    }

    fn resume(&self) {
        let _ = self.send(Command::Resume);
    }

    async fn stop(&self) -> Result<CapturedAudio, AdapterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop(reply))?;
        rx.await
            .map_err(|_| AdapterError::failed(AdapterKind::Recorder, "capture thread stopped"))
    }

    fn release(&self) {
        let _ = self.send(Command::Release);
    }

    fn is_available(&self) -> bool {
        input_available()
    }
}

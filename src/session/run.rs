//! Per-run state shared by the driver task, the phases and the public
//! session API.
//!
//! A [`RunScope`] lives from `start` until the session is back in idle.
//! Lock order is `Shared` (orchestrator) → pause gate → context; the context
//! lock is never held while the timer is started or resumed because both
//! tick synchronously.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapters::{Adapters, CapturedAudio};

use super::events::{EventSink, SessionEvent};
use super::factory::{DifficultyLevel, SessionConfig};
use super::state::{FlowState, StateContext};
use super::timer::CountdownTimer;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing panics while holding these locks; recover the data regardless.
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct RunData {
    speech_detected: bool,
    captured: Option<CapturedAudio>,
}

pub(crate) struct RunScope {
    pub adapters: Adapters,
    pub config: Arc<SessionConfig>,
    pub level: DifficultyLevel,
    pub prompt: String,
    pub timer: CountdownTimer,
    /// Cancelled by `stop`, by an adapter failure and on return to idle.
    pub token: CancellationToken,
    events: EventSink,
    generation: u64,
    ctx: Arc<Mutex<StateContext>>,
    started_at: Instant,
    /// `Some(state)` while paused: the phase that applied the pause.
    gate: Mutex<Option<FlowState>>,
    paused_signal: watch::Sender<bool>,
    pause_epoch: AtomicU64,
    data: Mutex<RunData>,
    answer_tx: mpsc::UnboundedSender<Option<String>>,
    answer_rx: Mutex<Option<mpsc::UnboundedReceiver<Option<String>>>>,
}

impl RunScope {
    pub fn new(
        adapters: Adapters,
        config: Arc<SessionConfig>,
        level: DifficultyLevel,
        prompt: String,
        fallback_answer: Option<String>,
        events: EventSink,
    ) -> Self {
        let mut ctx = StateContext::new(prompt.clone(), fallback_answer);
        ctx.recording_duration = config.record_time;
        let (paused_signal, _) = watch::channel(false);
        let (answer_tx, answer_rx) = mpsc::unbounded_channel();
        let generation = events.current_generation();
        Self {
            adapters,
            config,
            level,
            prompt,
            timer: CountdownTimer::new(),
            token: CancellationToken::new(),
            events,
            generation,
            ctx: Arc::new(Mutex::new(ctx)),
            started_at: Instant::now(),
            gate: Mutex::new(None),
            paused_signal,
            pause_epoch: AtomicU64::new(0),
            data: Mutex::new(RunData::default()),
            answer_tx,
            answer_rx: Mutex::new(Some(answer_rx)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(self.generation, event);
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn context(&self) -> StateContext {
        lock(&self.ctx).clone()
    }

    // -- pause ---------------------------------------------------------------

    pub fn is_paused(&self) -> bool {
        lock(&self.gate).is_some()
    }

    /// Number of pauses so far; lets a phase notice it was interrupted.
    pub fn pause_epoch(&self) -> u64 {
        self.pause_epoch.load(Ordering::SeqCst)
    }

    /// Suspend the run, applying the phase side effects under the gate.
    /// Returns `false` if already paused.
    pub fn pause(&self, state: FlowState, apply: impl FnOnce()) -> bool {
        let mut gate = lock(&self.gate);
        if gate.is_some() {
            return false;
        }
        *gate = Some(state);
        self.pause_epoch.fetch_add(1, Ordering::SeqCst);
        self.paused_signal.send_replace(true);
        apply();

        let mut ctx = lock(&self.ctx);
        ctx.is_paused = true;
        if self.timer.is_paused() {
            ctx.remaining_time = self.timer.remaining();
        }
        true
    }

    /// Lift the pause.  `apply` receives the phase that paused.  Returns
    /// `false` if not paused.
    pub fn resume(&self, apply: impl FnOnce(FlowState)) -> bool {
        let mut gate = lock(&self.gate);
        let Some(paused_in) = gate.take() else {
            return false;
        };
        lock(&self.ctx).is_paused = false;
        apply(paused_in);
        self.paused_signal.send_replace(false);
        true
    }

    /// Run `apply` if the run is paused; for side effects that started
    /// after the pause was applied.
    pub fn reapply_pause(&self, apply: impl FnOnce()) {
        let gate = lock(&self.gate);
        if gate.is_some() {
            apply();
        }
    }

    /// Wait until not paused.  `false` if `token` fired first.
    pub async fn wait_while_paused(&self, token: &CancellationToken) -> bool {
        let mut rx = self.paused_signal.subscribe();
        loop {
            let paused = *rx.borrow_and_update();
            if !paused {
                return true;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Resolves once a pause newer than `epoch` has landed.
    pub async fn paused_since(&self, epoch: u64) {
        let mut rx = self.paused_signal.subscribe();
        while self.pause_epoch() == epoch {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    // -- countdown -----------------------------------------------------------

    /// Start the run timer.  The receiver resolves when it reaches zero and
    /// errors if the countdown is discarded.  With `report` set every tick is
    /// emitted as [`SessionEvent::TimeUpdate`].
    pub fn start_countdown(&self, duration: Duration, report: bool) -> oneshot::Receiver<()> {
        {
            let mut ctx = lock(&self.ctx);
            ctx.countdown_total = duration;
            ctx.remaining_time = duration;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let ctx = Arc::clone(&self.ctx);
        let events = self.events.clone();
        let generation = self.generation;
        self.timer.start(
            duration,
            move |remaining| {
                lock(&ctx).remaining_time = remaining;
                if report {
                    events.emit(
                        generation,
                        SessionEvent::TimeUpdate {
                            remaining_secs: remaining.as_secs_f32(),
                        },
                    );
                }
            },
            move || {
                let _ = done_tx.send(());
            },
        );

        // A pause that arrived before this countdown existed.
        let gate = lock(&self.gate);
        if gate.is_some() {
            self.timer.pause();
        }
        done_rx
    }

    /// [`start_countdown`](Self::start_countdown) and wait for it.  `false`
    /// if cancelled.
    pub async fn countdown(&self, duration: Duration, token: &CancellationToken, report: bool) -> bool {
        let done = self.start_countdown(duration, report);
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            finished = done => finished.is_ok(),
        }
    }

    // -- data carried between phases ------------------------------------------

    pub fn mark_speech_detected(&self) {
        lock(&self.data).speech_detected = true;
    }

    pub fn speech_detected(&self) -> bool {
        lock(&self.data).speech_detected
    }

    pub fn store_capture(&self, audio: CapturedAudio) {
        lock(&self.data).captured = Some(audio);
    }

    pub fn take_capture(&self) -> Option<CapturedAudio> {
        lock(&self.data).captured.take()
    }

    // -- answer after timeout -------------------------------------------------

    pub fn request_answer(&self, text: Option<String>) {
        let _ = self.answer_tx.send(text);
    }

    /// Wait up to `wait` for a [`request_answer`](Self::request_answer).
    /// `Some(text)` carries an explicit answer; `None` means use the
    /// fallback, or that `token` fired first.
    pub async fn wait_for_answer(&self, wait: Duration, token: &CancellationToken) -> Option<String> {
        let mut answers = lock(&self.answer_rx).take()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            request = tokio::time::timeout(wait, answers.recv()) => request.ok().flatten().flatten(),
        }
    }

    pub fn fallback_answer(&self) -> Option<String> {
        lock(&self.ctx).fallback_answer_text.clone()
    }

    /// Result metadata common to every run.
    pub fn metadata(&self, recorded: Duration) -> BTreeMap<String, serde_json::Value> {
        let mut meta = BTreeMap::new();
        meta.insert("prompt".into(), self.prompt.clone().into());
        meta.insert("difficulty".into(), self.level.as_str().into());
        meta.insert("speech_detected".into(), self.speech_detected().into());
        meta.insert("recorded_ms".into(), (recorded.as_millis() as u64).into());
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fakes::{FakeRecognizer, FakeRecorder, FakeSynthesizer, FakeTonePlayer};
    use crate::session::events;

    fn scope() -> RunScope {
        let adapters = Adapters {
            synthesizer: Arc::new(FakeSynthesizer::new()),
            tone: Arc::new(FakeTonePlayer::new()),
            recorder: Arc::new(FakeRecorder::new()),
            recognizer: Arc::new(FakeRecognizer::silent()),
        };
        let (sink, _events) = events::channel();
        RunScope::new(
            adapters,
            Arc::new(SessionConfig::for_level(DifficultyLevel::Intermediate)),
            DifficultyLevel::Intermediate,
            "hello".into(),
            None,
            sink,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_reading_the_epoch_is_seen_immediately() {
        let run = scope();
        let epoch = run.pause_epoch();
        assert!(run.pause(FlowState::Cue, || {}));

        tokio::time::timeout(Duration::from_millis(1), run.paused_since(epoch))
            .await
            .expect("pause already landed");
    }

    #[tokio::test(start_paused = true)]
    async fn paused_since_waits_for_a_new_pause() {
        let run = Arc::new(scope());
        let epoch = run.pause_epoch();

        let waiter = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { run.paused_since(epoch).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        assert!(run.pause(FlowState::Cue, || {}));
        tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .expect("woken by the pause")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resume_undoes_the_pause_once() {
        let run = scope();
        assert!(run.pause(FlowState::Recording, || {}));
        assert!(!run.pause(FlowState::Recording, || {}));
        assert!(run.is_paused());
        assert!(run.context().is_paused);

        let mut resumed_in = None;
        assert!(run.resume(|state| resumed_in = Some(state)));
        assert_eq!(resumed_in, Some(FlowState::Recording));
        assert!(!run.resume(|_| {}));
        assert!(!run.context().is_paused);
    }
}

//! Public session API and the driver task behind it.
//!
//! [`Session::start`] moves the machine to `Prompt` and spawns one driver
//! task per run.  The driver walks the phases in order; every transition it
//! makes goes through the shared lock and is dropped if the run it belongs
//! to is no longer current, which is how `stop` and a failing phase win any
//! race with a phase that finishes at the same moment.
//!
//! ```text
//!  caller            Session (Shared lock)            driver task
//!  ──────            ─────────────────────            ───────────
//!  start ──────────▶ Idle→Prompt, spawn ────────────▶ enter(Prompt)
//!  pause/resume ───▶ phase.pause/resume                  │
//!                    execute(Complete) ◀─────────────────┘ exit, advance
//!  stop ───────────▶ new generation, →Idle, cancel ─────▶ token fired: return
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::adapters::{AdapterError, Adapters};

use super::events::{EventSink, SessionError, SessionEvent};
use super::factory::{DifficultyLevel, SessionConfig};
use super::machine::StateMachine;
use super::phase::{phase_for, Phase, PhaseOutcome};
use super::run::RunScope;
use super::state::{self, Action, DisplayInfo, FlowState, StateContext};

struct Shared {
    machine: StateMachine,
    run: Option<Arc<RunScope>>,
}

impl Shared {
    fn is_current(&self, run: &Arc<RunScope>) -> bool {
        self.run.as_ref().map_or(false, |r| Arc::ptr_eq(r, run))
    }
}

struct Inner {
    adapters: Adapters,
    config: Arc<SessionConfig>,
    level: DifficultyLevel,
    events: EventSink,
    runtime: Handle,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Never poisoned in practice: no code under this lock panics.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tear down a run that is leaving the machine.  Caller holds the lock.
    fn finish(&self, shared: &mut Shared, run: &RunScope) {
        shared.run = None;
        run.token.cancel();
        run.timer.stop();
        self.adapters.teardown();
    }

    /// Feed a phase outcome to the machine.  Returns the state to run next,
    /// or `None` when the driver should stop.
    fn advance(&self, run: &Arc<RunScope>, action: Action) -> Option<FlowState> {
        let mut shared = self.lock();
        if !shared.is_current(run) || run.token.is_cancelled() {
            return None;
        }
        if action == Action::Timeout {
            log::info!("session: no answer within {:?}", run.config.record_time);
            run.emit(SessionEvent::Timeout);
        }
        match shared.machine.execute_action(action, run.generation()) {
            Ok(FlowState::Idle) => {
                self.finish(&mut shared, run);
                log::info!("session: finished in {:?}", run.elapsed());
                None
            }
            Ok(next) => Some(next),
            Err(e) => {
                log::error!("session: {e}");
                shared.machine.force_idle(run.generation());
                self.finish(&mut shared, run);
                None
            }
        }
    }

    /// Report an adapter failure and return to idle.
    fn fail(&self, run: &Arc<RunScope>, state: FlowState, err: AdapterError) {
        let mut shared = self.lock();
        if !shared.is_current(run) || run.token.is_cancelled() {
            log::debug!("session: ignoring {err} from a cancelled run");
            return;
        }
        log::error!("session: {state} failed: {err}");
        run.emit(SessionEvent::Error(SessionError::adapter(&err)));
        shared.machine.force_idle(run.generation());
        self.finish(&mut shared, run);
    }
}

async fn run_phase(
    phase: &dyn Phase,
    run: &RunScope,
    token: &CancellationToken,
) -> Result<PhaseOutcome, AdapterError> {
    if !run.wait_while_paused(token).await {
        return Ok(PhaseOutcome::Cancelled);
    }
    let outcome = phase.enter(run, token).await?;
    if token.is_cancelled() {
        return Ok(PhaseOutcome::Cancelled);
    }
    if let PhaseOutcome::Advance(_) = outcome {
        phase.exit(run).await?;
    }
    Ok(outcome)
}

async fn drive(inner: Arc<Inner>, run: Arc<RunScope>) {
    let mut state = FlowState::Prompt;
    loop {
        let phase = phase_for(state);
        let token = run.token.child_token();
        let outcome = run_phase(phase, &run, &token).await;
        token.cancel();

        let action = match outcome {
            Ok(PhaseOutcome::Advance(action)) => action,
            Ok(PhaseOutcome::Cancelled) => return,
            Err(err) => return inner.fail(&run, state, err),
        };
        match inner.advance(&run, action) {
            Some(next) => state = next,
            None => return,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One drill session: prompt, think, answer, result.
///
/// Obtained from [`SessionFactory::create`](super::SessionFactory::create)
/// together with the [`SessionEvents`](super::SessionEvents) it reports to.
/// A session runs one exercise at a time and can be started again once it
/// is back in idle.  Dropping it stops any running exercise.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub(crate) fn new(
        adapters: Adapters,
        config: SessionConfig,
        level: DifficultyLevel,
        events: EventSink,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapters,
                config: Arc::new(config),
                level,
                shared: Mutex::new(Shared {
                    machine: StateMachine::new(events.clone()),
                    run: None,
                }),
                events,
                runtime,
            }),
        }
    }

    /// Begin an exercise for `prompt`.
    pub fn start(&self, prompt: &str) -> Result<(), SessionError> {
        self.start_with_answer(prompt, None)
    }

    /// Begin an exercise; `answer` is spoken if the learner times out.
    ///
    /// Fails without side effects on an empty prompt or while another
    /// exercise is active.
    pub fn start_with_answer(&self, prompt: &str, answer: Option<&str>) -> Result<(), SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SessionError::validation("prompt must not be empty"));
        }

        let mut shared = self.inner.lock();
        if shared.run.is_some() || shared.machine.current() != FlowState::Idle {
            return Err(SessionError::validation("a session is already active"));
        }

        let run = Arc::new(RunScope::new(
            self.inner.adapters.clone(),
            Arc::clone(&self.inner.config),
            self.inner.level,
            prompt.to_string(),
            answer.map(str::to_string),
            self.inner.events.clone(),
        ));
        shared.machine.execute_action(Action::Start, run.generation())?;
        shared.run = Some(Arc::clone(&run));
        drop(shared);

        log::info!("session: {} exercise started", self.inner.level);
        self.inner.runtime.spawn(drive(Arc::clone(&self.inner), run));
        Ok(())
    }

    /// Suspend the active phase.  Fails if the phase cannot be paused or the
    /// session is already paused.
    pub fn pause(&self) -> Result<(), SessionError> {
        let shared = self.inner.lock();
        let current = shared.machine.current();
        if state::transition(current, Action::Pause).is_none() {
            return Err(SessionError::lifecycle(format!("cannot pause while {current}")));
        }
        let Some(run) = shared.run.as_ref() else {
            return Err(SessionError::lifecycle("no exercise is running"));
        };

        let phase = phase_for(current);
        if !run.pause(current, || phase.pause(run)) {
            return Err(SessionError::validation("session is already paused"));
        }
        log::debug!("session: paused in {current}");
        Ok(())
    }

    /// Continue a paused session from where it stopped.
    pub fn resume(&self) -> Result<(), SessionError> {
        // The timer respawns its countdown task.
        let _runtime = self.inner.runtime.enter();
        let shared = self.inner.lock();
        let current = shared.machine.current();
        let run = match shared.run.as_ref() {
            Some(run) if run.is_paused() => run,
            _ if state::transition(current, Action::Resume).is_none() => {
                return Err(SessionError::lifecycle(format!("cannot resume while {current}")));
            }
            _ => return Err(SessionError::validation("session is not paused")),
        };

        run.resume(|paused_in| {
            if paused_in != current {
                phase_for(paused_in).resume(run);
            }
            phase_for(current).resume(run);
        });
        log::debug!("session: resumed in {current}");
        Ok(())
    }

    /// Abort the exercise and return to idle.
    ///
    /// Safe from any state and idempotent.  Once this returns, the only
    /// event still delivered is the `StateChanged(Idle)` it reports itself.
    /// Returns `false` if there was nothing to stop.
    pub fn stop(&self) -> bool {
        let mut shared = self.inner.lock();
        let Some(run) = shared.run.take() else {
            return false;
        };

        let generation = self.inner.events.advance_generation();
        run.token.cancel();
        run.timer.stop();
        if shared.machine.execute_action(Action::Stop, generation).is_err() {
            shared.machine.force_idle(generation);
        }
        drop(shared);

        self.inner.adapters.teardown();
        log::info!("session: stopped");
        true
    }

    /// After a timeout, speak `text` (or the answer given to
    /// [`start_with_answer`](Self::start_with_answer)) and finish.
    pub fn play_answer_and_next(&self, text: Option<&str>) -> Result<(), SessionError> {
        let shared = self.inner.lock();
        let current = shared.machine.current();
        match shared.run.as_ref() {
            Some(run) if current == FlowState::Timeout => {
                run.request_answer(text.map(str::to_string));
                Ok(())
            }
            _ => Err(SessionError::lifecycle(format!(
                "can only play the answer after a timeout, not while {current}"
            ))),
        }
    }

    pub fn current_state(&self) -> FlowState {
        self.inner.lock().machine.current()
    }

    pub fn is_active(&self) -> bool {
        self.current_state().is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().run.as_ref().map_or(false, |run| run.is_paused())
    }

    /// Snapshot of the running exercise's context; `None` when idle.
    pub fn context(&self) -> Option<StateContext> {
        self.inner.lock().run.as_ref().map(|run| run.context())
    }

    pub fn display_info(&self) -> DisplayInfo {
        let shared = self.inner.lock();
        let ctx = shared.run.as_ref().map(|run| run.context()).unwrap_or_default();
        phase_for(shared.machine.current()).display_info(&ctx)
    }

    pub fn allowed_actions(&self) -> Vec<Action> {
        self.display_info().allowed_actions
    }

    pub fn level(&self) -> DifficultyLevel {
        self.inner.level
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::adapters::fakes::{FakeRecognizer, FakeRecorder, FakeSynthesizer, FakeTonePlayer};
    use crate::adapters::AdapterKind;
    use crate::session::events::{self, ErrorCode, SessionEvents, SessionResult};

    const PATIENCE: Duration = Duration::from_secs(300);

    struct Rig {
        synth: Arc<FakeSynthesizer>,
        tone: Arc<FakeTonePlayer>,
        recorder: Arc<FakeRecorder>,
        recognizer: Arc<FakeRecognizer>,
    }

    impl Rig {
        fn new(recognizer: FakeRecognizer) -> Self {
            Self {
                synth: Arc::new(FakeSynthesizer::new()),
                tone: Arc::new(FakeTonePlayer::new()),
                recorder: Arc::new(FakeRecorder::new()),
                recognizer: Arc::new(recognizer),
            }
        }

        fn with_synth(mut self, synth: FakeSynthesizer) -> Self {
            self.synth = Arc::new(synth);
            self
        }

        fn session(&self, config: SessionConfig) -> (Session, SessionEvents) {
            let adapters = Adapters {
                synthesizer: self.synth.clone(),
                tone: self.tone.clone(),
                recorder: self.recorder.clone(),
                recognizer: self.recognizer.clone(),
            };
            let (sink, events) = events::channel();
            let session = Session::new(
                adapters,
                config,
                DifficultyLevel::Intermediate,
                sink,
                Handle::current(),
            );
            (session, events)
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::for_level(DifficultyLevel::Intermediate)
    }

    fn answering() -> FakeRecognizer {
        FakeRecognizer::speaking("안녕하세요", 0.9, Duration::from_secs(1), Duration::from_secs(3))
    }

    async fn next_event(events: &mut SessionEvents) -> SessionEvent {
        tokio::time::timeout(PATIENCE, events.recv())
            .await
            .expect("session went quiet")
            .expect("event channel closed")
    }

    /// Collect events up to and including `StateChanged(target)`.
    async fn until_state(events: &mut SessionEvents, target: FlowState) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = next_event(events).await;
            let reached = matches!(event, SessionEvent::StateChanged(s) if s == target);
            seen.push(event);
            if reached {
                return seen;
            }
        }
    }

    fn states(events: &[SessionEvent]) -> Vec<FlowState> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn results(events: &[SessionEvent]) -> Vec<&SessionResult> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Result(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn timeouts(events: &[SessionEvent]) -> usize {
        events.iter().filter(|e| matches!(e, SessionEvent::Timeout)).count()
    }

    /// Nothing at all arrives for a long stretch of (virtual) time.
    async fn assert_silent(events: &mut SessionEvents) {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let late = events.try_recv();
        assert!(late.is_none(), "unexpected event after stop: {late:?}");
    }

    // -- happy path ----------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn answer_runs_every_phase_and_reports_one_result() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());

        session.start("안녕하세요").unwrap();
        assert_eq!(session.current_state(), FlowState::Prompt);
        let seen = until_state(&mut events, FlowState::Idle).await;

        assert_eq!(
            states(&seen),
            vec![
                FlowState::Prompt,
                FlowState::Cue,
                FlowState::Recording,
                FlowState::Processing,
                FlowState::Idle,
            ]
        );
        let results = results(&seen);
        assert_eq!(results.len(), 1);
        let result = results[0];
        assert_eq!(result.transcript, "안녕하세요");
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert_eq!(result.metadata["prompt"], "안녕하세요");
        assert_eq!(result.metadata["difficulty"], "intermediate");
        assert_eq!(result.metadata["speech_detected"], true);
        assert_eq!(result.metadata["recorded_ms"], 1_000);
        let wav = result.captured_audio.as_ref().expect("captured audio");
        assert_eq!(&wav[..4], b"RIFF");

        // Result is the last thing before idle.
        assert!(matches!(seen[seen.len() - 2], SessionEvent::Result(_)));
        assert_eq!(timeouts(&seen), 0);
        assert_eq!(rig.synth.spoken(), vec!["안녕하세요".to_string()]);
        assert_eq!(rig.tone.played(), vec![(880.0, Duration::from_millis(250))]);
        assert_eq!(session.current_state(), FlowState::Idle);
        assert!(session.context().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn think_countdown_is_reported_from_full_duration() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();

        let seen = until_state(&mut events, FlowState::Recording).await;
        let cue_ticks: Vec<f32> = seen
            .iter()
            .skip_while(|e| !matches!(e, SessionEvent::StateChanged(FlowState::Cue)))
            .filter_map(|e| match e {
                SessionEvent::TimeUpdate { remaining_secs } => Some(*remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(cue_ticks.first().copied(), Some(3.0));
        assert_eq!(cue_ticks.last().copied(), Some(0.0));
        assert!(cue_ticks.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn natural_completion_releases_the_microphone() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Idle).await;

        assert_eq!(rig.recorder.start_count(), 1);
        assert!(rig.recorder.release_count() >= 1);
        assert!(!rig.recorder.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn session_can_run_again_after_finishing() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());

        session.start("first").unwrap();
        until_state(&mut events, FlowState::Idle).await;
        session.start("second").unwrap();
        let seen = until_state(&mut events, FlowState::Idle).await;

        assert_eq!(results(&seen).len(), 1);
        assert_eq!(rig.synth.spoken(), vec!["first".to_string(), "second".to_string()]);
    }

    // -- preconditions -------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn empty_prompt_is_rejected_without_side_effects() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());

        for prompt in ["", "   "] {
            let err = session.start(prompt).unwrap_err();
            assert_eq!(err.code, ErrorCode::Validation);
        }
        assert_eq!(session.current_state(), FlowState::Idle);
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_none());
        assert!(rig.synth.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_and_leaves_the_first_alone() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());

        session.start_with_answer("first", Some("one")).unwrap();
        let before = session.context();
        let err = session.start("second").unwrap_err();

        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(session.current_state(), FlowState::Prompt);
        assert_eq!(session.context(), before);

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(results(&seen)[0].metadata["prompt"], "first");
        assert_eq!(rig.synth.spoken(), vec!["first".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_rejected_while_idle() {
        let rig = Rig::new(answering());
        let (session, _events) = rig.session(config());

        assert_eq!(session.pause().unwrap_err().code, ErrorCode::Lifecycle);
        assert_eq!(session.resume().unwrap_err().code, ErrorCode::Lifecycle);
        assert_eq!(
            session.play_answer_and_next(None).unwrap_err().code,
            ErrorCode::Lifecycle
        );
        assert!(!session.stop());
        assert_eq!(session.allowed_actions(), vec![Action::Start]);
    }

    // -- pause / resume ------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn pause_at_seven_seconds_resumes_with_three_left() {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(10);
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(cfg.clone());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Recording).await;

        tokio::time::sleep(cfg.pre_roll_time + Duration::from_secs(7)).await;
        session.pause().unwrap();
        let remaining = session.context().unwrap().remaining_time;
        assert!(
            (remaining.as_secs_f64() - 3.0).abs() < 0.01,
            "remaining {remaining:?}"
        );

        // Paused time does not count.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(session.current_state(), FlowState::Recording);
        assert_eq!(session.context().unwrap().remaining_time, remaining);
        assert!(rig.recorder.pause_count() >= 1);

        let info = session.display_info();
        assert!(info.is_paused);
        assert!(info.status.ends_with("(paused)"));
        assert_eq!(info.allowed_actions, vec![Action::Stop, Action::Resume]);

        session.resume().unwrap();
        let resumed_at = Instant::now();
        let seen = until_state(&mut events, FlowState::Timeout).await;
        let waited = resumed_at.elapsed().as_secs_f64();
        assert!((waited - 3.0).abs() < 0.15, "timed out {waited}s after resume");
        assert_eq!(timeouts(&seen), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_pause_fails_and_keeps_the_first() {
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Recording).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        session.pause().unwrap();
        let first = session.context().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let err = session.pause().unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(session.is_paused());
        assert_eq!(session.context().unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_without_pause_fails() {
        let rig = Rig::new(answering());
        let (session, _events) = rig.session(config());
        session.start("hello").unwrap();

        let err = session.resume().unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(session.current_state(), FlowState::Prompt);
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_the_prompt_holds_speech() {
        let rig = Rig::new(answering()).with_synth(FakeSynthesizer::new().with_duration(Duration::from_secs(2)));
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();

        // Past the prompt delay, mid-utterance.
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.pause().unwrap();
        assert_eq!(rig.synth.pause_count(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(session.current_state(), FlowState::Prompt);

        session.resume().unwrap();
        let resumed_at = Instant::now();
        until_state(&mut events, FlowState::Cue).await;
        let waited = resumed_at.elapsed();
        assert!(waited <= Duration::from_millis(1_400), "prompt ran on for {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn pausing_the_cue_tone_replays_it() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Cue).await;

        // Think time is 3 s; the 250 ms tone is now playing.
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        session.pause().unwrap();
        assert_eq!(rig.tone.stop_count(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.current_state(), FlowState::Cue);

        session.resume().unwrap();
        until_state(&mut events, FlowState::Recording).await;
        assert_eq!(rig.tone.played().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_in_think_time_freezes_the_countdown() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Cue).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.pause().unwrap();
        let remaining = session.context().unwrap().remaining_time;
        assert!((remaining.as_secs_f64() - 2.0).abs() < 0.01);

        tokio::time::sleep(Duration::from_secs(10)).await;
        while events.try_recv().is_some() {}
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events.try_recv().is_none(), "ticks while paused");
        assert!(rig.tone.played().is_empty());
        session.stop();
    }

    // -- timeout -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_once_and_plays_the_fallback() {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(1);
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(cfg.clone());
        session.start_with_answer("질문", Some("정답")).unwrap();

        until_state(&mut events, FlowState::Recording).await;
        let recording_at = Instant::now();
        let mut seen = Vec::new();
        loop {
            let event = next_event(&mut events).await;
            if matches!(event, SessionEvent::Timeout) {
                let after = recording_at.elapsed();
                let expected = cfg.pre_roll_time + cfg.record_time;
                assert!(after >= expected && after < expected + Duration::from_millis(150));
            }
            let idle = matches!(event, SessionEvent::StateChanged(FlowState::Idle));
            seen.push(event);
            if idle {
                break;
            }
        }

        assert_eq!(timeouts(&seen), 1);
        assert_eq!(states(&seen), vec![FlowState::Timeout, FlowState::Idle]);
        assert!(results(&seen).is_empty());
        assert_eq!(rig.synth.spoken(), vec!["질문".to_string(), "정답".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn play_answer_and_next_speaks_the_requested_text() {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(1);
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(cfg);
        session.start_with_answer("질문", Some("정답")).unwrap();

        until_state(&mut events, FlowState::Timeout).await;
        let asked_at = Instant::now();
        session.play_answer_and_next(Some("사과")).unwrap();
        until_state(&mut events, FlowState::Idle).await;

        // Speech takes 500 ms; the 3 s answer wait was cut short.
        assert!(asked_at.elapsed() < Duration::from_secs(1));
        assert_eq!(rig.synth.spoken().last().map(String::as_str), Some("사과"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_any_answer_goes_idle_silently() {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(1);
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(cfg);
        session.start("질문").unwrap();

        until_state(&mut events, FlowState::Idle).await;
        assert_eq!(rig.synth.spoken(), vec!["질문".to_string()]);
    }

    // -- recording end conditions ----------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn answer_still_running_gets_one_grace_extension() {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(2);
        cfg.grace_late_time = Duration::from_secs(1);
        let rig = Rig::new(FakeRecognizer::rambling("길게 말하기", Duration::from_millis(500)));
        let (session, mut events) = rig.session(cfg.clone());
        session.start("hello").unwrap();

        until_state(&mut events, FlowState::Recording).await;
        let recording_at = Instant::now();
        let seen = until_state(&mut events, FlowState::Processing).await;
        let took = recording_at.elapsed();
        let expected = cfg.pre_roll_time + cfg.record_time + cfg.grace_late_time;
        assert!(took >= expected && took < expected + Duration::from_millis(150), "{took:?}");
        assert_eq!(timeouts(&seen), 0);

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(results(&seen)[0].transcript, "길게 말하기");
    }

    #[tokio::test(start_paused = true)]
    async fn without_vad_the_full_budget_is_recorded() {
        let mut cfg = config();
        cfg.enable_vad = false;
        cfg.record_time = Duration::from_secs(4);
        let rig = Rig::new(FakeRecognizer::speaking(
            "네",
            0.8,
            Duration::from_millis(300),
            Duration::from_secs(1),
        ));
        let (session, mut events) = rig.session(cfg.clone());
        session.start("hello").unwrap();

        until_state(&mut events, FlowState::Recording).await;
        let recording_at = Instant::now();
        until_state(&mut events, FlowState::Processing).await;
        assert!(recording_at.elapsed() >= cfg.pre_roll_time + cfg.record_time);

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(results(&seen)[0].transcript, "네");
    }

    // -- stop ----------------------------------------------------------------

    async fn stop_in(target: FlowState) {
        let mut cfg = config();
        cfg.record_time = Duration::from_secs(1);
        let rig = Rig::new(FakeRecognizer::silent());
        let (session, mut events) = rig.session(cfg);
        session.start_with_answer("hello", Some("world")).unwrap();
        until_state(&mut events, target).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.current_state(), target);

        assert!(session.stop());
        assert_eq!(session.current_state(), FlowState::Idle);
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::StateChanged(FlowState::Idle)
        ));
        assert_silent(&mut events).await;

        assert!(!session.stop(), "second stop is a no-op");
        assert!(rig.recorder.release_count() >= 1);
        assert!(!rig.recorder.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_prompt() {
        stop_in(FlowState::Prompt).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_cue() {
        stop_in(FlowState::Cue).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_recording() {
        stop_in(FlowState::Recording).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_timeout() {
        stop_in(FlowState::Timeout).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_processing_forces_idle_without_a_result() {
        let rig = Rig::new(answering().with_stop_delay(Duration::from_secs(5)));
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();
        until_state(&mut events, FlowState::Processing).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.current_state(), FlowState::Processing);
        assert!(!session.allowed_actions().contains(&Action::Stop));

        assert!(session.stop());
        assert_eq!(session.current_state(), FlowState::Idle);
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::StateChanged(FlowState::Idle)
        ));
        assert_silent(&mut events).await;
        assert!(!rig.recorder.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_then_restart() {
        let rig = Rig::new(answering());
        let (session, mut events) = rig.session(config());
        session.start("first").unwrap();
        until_state(&mut events, FlowState::Cue).await;
        session.pause().unwrap();

        assert!(session.stop());
        assert!(!session.is_paused());
        until_state(&mut events, FlowState::Idle).await;

        session.start("second").unwrap();
        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(results(&seen).len(), 1);
        assert_eq!(results(&seen)[0].metadata["prompt"], "second");
    }

    // -- adapter failures ----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn synthesis_failure_reports_once_and_returns_to_idle() {
        let rig = Rig::new(answering()).with_synth(FakeSynthesizer::new().failing("engine crashed"));
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(states(&seen), vec![FlowState::Prompt, FlowState::Idle]);
        let errors: Vec<&SessionError> = seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::Adapter(AdapterKind::Synthesis));
        assert!(errors[0].message.contains("engine crashed"));

        // Immediately usable again.
        session.start("again").unwrap();
        assert_eq!(session.current_state(), FlowState::Prompt);
    }

    #[tokio::test(start_paused = true)]
    async fn recorder_failure_releases_and_reports() {
        let mut rig = Rig::new(answering());
        rig.recorder = Arc::new(FakeRecorder::new().failing_start("device busy"));
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert_eq!(
            states(&seen),
            vec![FlowState::Prompt, FlowState::Cue, FlowState::Recording, FlowState::Idle]
        );
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::Error(err) if err.code == ErrorCode::Adapter(AdapterKind::Recorder)
        )));
        assert!(rig.recorder.release_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recognizer_failure_in_processing_reports_no_result() {
        let rig = Rig::new(answering().failing_stop("decoder crashed"));
        let (session, mut events) = rig.session(config());
        session.start("hello").unwrap();

        let seen = until_state(&mut events, FlowState::Idle).await;
        assert!(results(&seen).is_empty());
        assert!(seen.iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert_eq!(session.current_state(), FlowState::Idle);
    }
}

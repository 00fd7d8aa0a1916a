use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::{AdapterError, ListenOptions, RecognitionEvent};
use crate::session::run::RunScope;
use crate::session::state::{Action, FlowState};

use super::{Phase, PhaseOutcome};

/// Microphone open, recognizer listening, record budget counting down.
///
/// Ends on end-of-speech (with VAD), or when the budget runs out: with
/// speech heard that is a completion, without it a timeout.  An answer
/// still in progress when the budget expires gets one grace extension.
pub(crate) struct RecordingPhase;

#[async_trait]
impl Phase for RecordingPhase {
    fn state(&self) -> FlowState {
        FlowState::Recording
    }

    async fn enter(&self, run: &RunScope, token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        let config = &run.config;
        let adapters = &run.adapters;

        let opts = ListenOptions {
            vad_threshold: config.vad_threshold,
            end_silence: config.end_silence,
        };
        let mut speech = adapters.recognizer.start_listening(&opts).await?;
        adapters.recorder.start().await?;
        run.reapply_pause(|| {
            adapters.recorder.pause();
            adapters.recognizer.pause();
        });

        // Pre-roll is captured but not charged to the budget.
        if !run.countdown(config.pre_roll_time, token, false).await {
            return Ok(PhaseOutcome::Cancelled);
        }

        let mut budget = run.start_countdown(config.record_time, true);
        let mut heard = false;
        let mut in_speech = false;
        let mut extended = false;
        let mut listening = true;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(PhaseOutcome::Cancelled),
                event = speech.recv(), if listening => match event {
                    Some(RecognitionEvent::SpeechStarted) => {
                        log::debug!("recording: speech started");
                        heard = true;
                        in_speech = true;
                        run.mark_speech_detected();
                    }
                    Some(RecognitionEvent::SpeechEnded) => {
                        log::debug!("recording: speech ended");
                        in_speech = false;
                        if config.enable_vad && heard {
                            return Ok(PhaseOutcome::Advance(Action::Complete));
                        }
                    }
                    None => listening = false,
                },
                elapsed = &mut budget => {
                    if elapsed.is_err() {
                        return Ok(PhaseOutcome::Cancelled);
                    }
                    if in_speech && !extended && !config.grace_late_time.is_zero() {
                        log::debug!("recording: still speaking, extending by {:?}", config.grace_late_time);
                        extended = true;
                        budget = run.start_countdown(config.grace_late_time, true);
                        continue;
                    }
                    let action = if heard { Action::Complete } else { Action::Timeout };
                    return Ok(PhaseOutcome::Advance(action));
                }
            }
        }
    }

    async fn exit(&self, run: &RunScope) -> Result<(), AdapterError> {
        run.timer.stop();
        let audio = run.adapters.recorder.stop().await?;
        log::debug!("recording: captured {:?} of audio", audio.duration());
        run.store_capture(audio);
        Ok(())
    }

    fn pause(&self, run: &RunScope) {
        run.timer.pause();
        run.adapters.recorder.pause();
        run.adapters.recognizer.pause();
    }

    fn resume(&self, run: &RunScope) {
        run.adapters.recognizer.resume();
        run.adapters.recorder.resume();
        run.timer.resume();
    }
}

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;
use crate::session::run::RunScope;
use crate::session::state::{Action, FlowState};

use super::{Phase, PhaseOutcome};

/// Think-time countdown, then the beep that tells the learner to answer.
pub(crate) struct CuePhase;

#[async_trait]
impl Phase for CuePhase {
    fn state(&self) -> FlowState {
        FlowState::Cue
    }

    async fn enter(&self, run: &RunScope, token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        if !run.countdown(run.config.think_time, token, true).await {
            return Ok(PhaseOutcome::Cancelled);
        }

        // A pause cuts the tone short; play it again in full afterwards.
        loop {
            if !run.wait_while_paused(token).await {
                return Ok(PhaseOutcome::Cancelled);
            }
            let epoch = run.pause_epoch();
            if run.is_paused() {
                continue;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(PhaseOutcome::Cancelled),
                _ = run.paused_since(epoch) => run.adapters.tone.stop(),
                played = run.adapters.tone.play(run.config.cue_frequency_hz, run.config.beep_duration) => played?,
            }
            if run.pause_epoch() == epoch {
                return Ok(PhaseOutcome::Advance(Action::Complete));
            }
            log::debug!("cue: tone interrupted, replaying after resume");
        }
    }

    fn pause(&self, run: &RunScope) {
        run.timer.pause();
        run.adapters.tone.stop();
    }

    fn resume(&self, run: &RunScope) {
        run.timer.resume();
    }
}

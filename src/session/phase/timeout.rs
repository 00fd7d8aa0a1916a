use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;
use crate::session::run::RunScope;
use crate::session::state::{Action, FlowState};

use super::{Phase, PhaseOutcome};

/// No answer in time: speak the correct answer, then go idle.
pub(crate) struct TimeoutPhase;

#[async_trait]
impl Phase for TimeoutPhase {
    fn state(&self) -> FlowState {
        FlowState::Timeout
    }

    async fn enter(&self, run: &RunScope, token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        run.adapters.recognizer.cancel();

        let requested = run.wait_for_answer(run.config.answer_wait, token).await;
        if token.is_cancelled() {
            return Ok(PhaseOutcome::Cancelled);
        }

        let Some(answer) = requested.or_else(|| run.fallback_answer()).filter(|a| !a.trim().is_empty())
        else {
            log::debug!("timeout: no answer to play");
            return Ok(PhaseOutcome::Advance(Action::Complete));
        };

        log::debug!("timeout: playing answer {answer:?}");
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(PhaseOutcome::Cancelled),
            spoken = run.adapters.synthesizer.speak(&answer, &run.config.speak) => {
                spoken?;
                Ok(PhaseOutcome::Advance(Action::Complete))
            }
        }
    }
}

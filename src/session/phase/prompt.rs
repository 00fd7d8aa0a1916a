use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;
use crate::session::run::RunScope;
use crate::session::state::{Action, FlowState};

use super::{Phase, PhaseOutcome};

/// Short silence, then the prompt is spoken.
pub(crate) struct PromptPhase;

#[async_trait]
impl Phase for PromptPhase {
    fn state(&self) -> FlowState {
        FlowState::Prompt
    }

    async fn enter(&self, run: &RunScope, token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        if !run.countdown(run.config.prompt_delay, token, false).await {
            return Ok(PhaseOutcome::Cancelled);
        }
        if !run.wait_while_paused(token).await {
            return Ok(PhaseOutcome::Cancelled);
        }

        log::debug!("prompt: speaking {:?}", run.prompt);
        tokio::select! {
            biased;
            _ = token.cancelled() => Ok(PhaseOutcome::Cancelled),
            spoken = run.adapters.synthesizer.speak(&run.prompt, &run.config.speak) => {
                spoken?;
                Ok(PhaseOutcome::Advance(Action::Complete))
            }
        }
    }

    fn pause(&self, run: &RunScope) {
        run.timer.pause();
        run.adapters.synthesizer.pause();
    }

    fn resume(&self, run: &RunScope) {
        run.timer.resume();
        run.adapters.synthesizer.resume();
    }
}

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;
use crate::session::run::RunScope;
use crate::session::state::FlowState;

use super::{Phase, PhaseOutcome};

/// Resting state.  Nothing runs; only `start` leaves it.
pub(crate) struct IdlePhase;

#[async_trait]
impl Phase for IdlePhase {
    fn state(&self) -> FlowState {
        FlowState::Idle
    }

    async fn enter(&self, _run: &RunScope, _token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        Ok(PhaseOutcome::Cancelled)
    }
}

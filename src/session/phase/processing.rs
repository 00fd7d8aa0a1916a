use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::AdapterError;
use crate::audio::encode_wav;
use crate::session::events::{SessionEvent, SessionResult};
use crate::session::run::RunScope;
use crate::session::state::{Action, FlowState};

use super::{Phase, PhaseOutcome};

/// Finalise recognition and publish the result.
pub(crate) struct ProcessingPhase;

#[async_trait]
impl Phase for ProcessingPhase {
    fn state(&self) -> FlowState {
        FlowState::Processing
    }

    async fn enter(&self, run: &RunScope, token: &CancellationToken) -> Result<PhaseOutcome, AdapterError> {
        let transcript = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(PhaseOutcome::Cancelled),
            transcript = run.adapters.recognizer.stop_listening() => transcript?,
        };

        let captured = run.take_capture().unwrap_or_default();
        let recorded = captured.duration();
        let captured_audio = if captured.is_empty() {
            None
        } else {
            match encode_wav(&captured.samples, captured.sample_rate) {
                Ok(wav) => Some(wav),
                Err(e) => {
                    log::warn!("processing: could not encode answer audio: {e}");
                    None
                }
            }
        };

        log::info!(
            "processing: \"{}\" (confidence {:.2})",
            transcript.text,
            transcript.confidence
        );
        run.emit(SessionEvent::Result(SessionResult {
            transcript: transcript.text,
            confidence: transcript.confidence,
            captured_audio,
            elapsed: run.elapsed(),
            metadata: run.metadata(recorded),
        }));
        Ok(PhaseOutcome::Advance(Action::Complete))
    }
}

use std::sync::Arc;

use detector::DriverError;
use shared::domain::{AcquiredSpectrum, SpectrumRecord, TelemetrySample};
use shared::error::ProtocolError;
use shared::protocol::Response;
use tracing::{debug, error, warn};

use crate::{
    send_to,
    session::{lock_driver, AcquisitionState},
    Controller, MAX_CONSECUTIVE_FAILURES,
};

/// Result of one offloaded acquisition, delivered back onto the event loop.
/// Carries the session epoch so results that outlive their session are
/// discarded instead of being applied to a closed store handle.
#[derive(Debug)]
pub struct AcquisitionOutcome {
    pub(crate) epoch: u64,
    pub(crate) result: Result<(AcquiredSpectrum, TelemetrySample), DriverError>,
}

impl Controller {
    /// One scheduler tick. Starts an acquisition if the session is active and
    /// none is in flight; ticks arriving while one is in flight are dropped,
    /// not queued.
    pub fn tick(&mut self) {
        let Some(binding) = self.detector.as_ref() else {
            return;
        };
        let driver = Arc::clone(&binding.driver);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.acquisition == AcquisitionState::InFlight {
            return;
        }
        session.acquisition = AcquisitionState::InFlight;

        let args = session.args.clone();
        let epoch = session.epoch;
        let reader = self.telemetry.clone();
        let outcomes = self.acquisitions_tx.clone();

        tokio::task::spawn_blocking(move || {
            // Snapshot telemetry at acquisition start, as close as possible
            // to the moment the counts begin accumulating.
            let sample = reader.latest();
            let result = lock_driver(&driver)
                .acquire(&args)
                .map(|spectrum| (spectrum, sample));
            let _ = outcomes.send(AcquisitionOutcome { epoch, result });
        });
    }

    /// Applies a completed acquisition back on the event loop: persists and
    /// reports on success, counts failures and escalates at the threshold.
    pub async fn apply_outcome(&mut self, outcome: AcquisitionOutcome) {
        let Some(session) = self.session.as_mut() else {
            debug!("discarding acquisition result, no session active");
            return;
        };
        if session.epoch != outcome.epoch {
            debug!(
                stale_epoch = outcome.epoch,
                live_epoch = session.epoch,
                "discarding acquisition result from a finished session"
            );
            return;
        }

        session.acquisition = AcquisitionState::Ready;

        let escalate = match outcome.result {
            Ok((spectrum, sample)) => {
                let record = SpectrumRecord::assemble(
                    session.handle.session_name(),
                    session.next_index,
                    spectrum,
                    sample,
                );
                session.next_index += 1;
                session.consecutive_failures = 0;

                if let Err(insert_error) = self.store.insert_spectrum(&session.handle, &record).await
                {
                    // The operator still gets the spectrum live; it just will
                    // not be retrievable through sync_session later.
                    warn!(error = %format!("{insert_error:#}"), index = record.index,
                        "failed to persist spectrum");
                    send_to(
                        &self.outbound,
                        ProtocolError::error(format!(
                            "failed to persist spectrum {}: {insert_error:#}",
                            record.index
                        )),
                    );
                }
                send_to(&self.outbound, Response::Spectrum { record });
                false
            }
            Err(acquire_error) => {
                session.consecutive_failures += 1;
                error!(
                    error = %acquire_error,
                    failures = session.consecutive_failures,
                    "acquisition failed"
                );
                send_to(&self.outbound, ProtocolError::error(acquire_error.to_string()));
                session.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
            }
        };

        if escalate {
            self.teardown_session().await;
            self.send(ProtocolError::error(format!(
                "acquiring spectrum has failed {MAX_CONSECUTIVE_FAILURES} times, stopping session"
            )));
        }
    }
}

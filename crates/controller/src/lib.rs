//! Session lifecycle and acquisition scheduling core. One event loop owns a
//! [`Controller`] and feeds it datagrams, scheduler ticks, completed
//! acquisitions, and completed driver lifecycle calls; everything the
//! daemon sends back to the operator leaves through the outbound channel.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use detector::{DriverError, DriverRegistry};
use shared::{
    domain::{DetectorConfig, SessionArgs, StatusReport},
    error::{FailureKind, ProtocolError},
    protocol::{Outbound, Request, Response},
};
use storage::{SessionHandle, SpectrumStore};
use telemetry::TelemetryReader;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

mod scheduler;
mod session;
mod sys;

pub use scheduler::AcquisitionOutcome;
pub use session::{AcquisitionState, ActiveSession, DetectorBinding, SharedDriver};

use session::lock_driver;

/// Consecutive acquisition failures that force the session down.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Result of one off-loop driver lifecycle call (detector configuration or
/// session start), delivered back onto the event loop. The driver mutex may
/// be held by a still-running acquisition, so these calls never run on the
/// loop itself.
#[derive(Debug)]
pub struct DriverOpOutcome {
    pub(crate) result: Result<(), DriverError>,
}

/// The command whose driver work is currently on the blocking pool. At most
/// one lifecycle operation runs at a time; commands that would start another
/// are rejected until the outcome is applied.
enum PendingDriverOp {
    DetectorConfig {
        config: DetectorConfig,
        driver: SharedDriver,
    },
    StartSession {
        args: SessionArgs,
        handle: SessionHandle,
    },
}

pub struct Controller {
    registry: DriverRegistry,
    store: SpectrumStore,
    telemetry: TelemetryReader,
    data_dir: PathBuf,
    outbound: mpsc::UnboundedSender<Outbound>,
    acquisitions_tx: mpsc::UnboundedSender<AcquisitionOutcome>,
    driver_ops_tx: mpsc::UnboundedSender<DriverOpOutcome>,
    detector: Option<DetectorBinding>,
    session: Option<ActiveSession>,
    pending: Option<PendingDriverOp>,
    session_finalizers: Vec<JoinHandle<()>>,
    epoch: u64,
}

impl Controller {
    /// Builds the controller plus the three channels the event loop drains:
    /// completed acquisitions (fed back into [`Controller::apply_outcome`]),
    /// completed driver lifecycle calls (fed back into
    /// [`Controller::apply_driver_outcome`]), and outbound envelopes for the
    /// operator.
    pub fn new(
        registry: DriverRegistry,
        store: SpectrumStore,
        telemetry: TelemetryReader,
        data_dir: PathBuf,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<AcquisitionOutcome>,
        mpsc::UnboundedReceiver<DriverOpOutcome>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (acquisitions_tx, acquisitions_rx) = mpsc::unbounded_channel();
        let (driver_ops_tx, driver_ops_rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                store,
                telemetry,
                data_dir,
                outbound,
                acquisitions_tx,
                driver_ops_tx,
                detector: None,
                session: None,
                pending: None,
                session_finalizers: Vec::new(),
                epoch: 0,
            },
            acquisitions_rx,
            driver_ops_rx,
            outbound_rx,
        )
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn detector_configured(&self) -> bool {
        self.detector.is_some()
    }

    pub fn driver_op_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Decodes and executes one inbound datagram. Rejections and decode
    /// failures produce a failure envelope and mutate nothing.
    pub async fn handle_datagram(&mut self, payload: &[u8]) {
        let request: Request = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(decode_error) => {
                warn!(%decode_error, "rejected undecodable command envelope");
                self.send(ProtocolError::error(format!(
                    "invalid command envelope: {decode_error}"
                )));
                return;
            }
        };

        if let Err(rejection) = self.execute(request).await {
            info!(%rejection, "command rejected");
            self.send(rejection);
        }
    }

    async fn execute(&mut self, request: Request) -> Result<(), ProtocolError> {
        match request {
            Request::DetectorConfig { detector_data } => {
                info!(plugin = %detector_data.plugin_name, "received detector_config");
                self.detector_config(detector_data)
            }
            Request::StartSession { args } => {
                info!(session = %args.session_name, "received start_session");
                self.start_session(args).await
            }
            Request::StopSession { session_name } => {
                info!(session = %session_name, "received stop_session");
                self.stop_session(session_name).await
            }
            Request::DumpSession { session_name } => {
                info!(session = %session_name, "received dump_session");
                self.dump_session(session_name)
            }
            Request::GetStatus => {
                info!("received get_status");
                self.get_status();
                Ok(())
            }
            Request::SyncSession {
                session_name,
                indices_list,
                last_index,
            } => {
                info!(session = %session_name, "received sync_session");
                self.sync_session(session_name, indices_list, last_index)
                    .await
            }
        }
    }

    /// Phase one of detector configuration: resolve the plugin and dispatch
    /// the hardware initialization to the blocking pool. The binding is
    /// committed by [`Controller::apply_driver_outcome`]; the driver mutex is
    /// never taken on the event loop because a discarded acquisition may
    /// still hold it for up to its remaining livetime.
    fn detector_config(&mut self, config: DetectorConfig) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::new(
                FailureKind::DetectorConfigBusy,
                "detector config failed, session is active",
            ));
        }
        if self.pending.is_some() {
            return Err(ProtocolError::error(
                "detector config failed, a previous command is still completing",
            ));
        }

        // Resolution is side-effect free; an unknown plugin leaves any
        // current binding untouched.
        let driver = self.registry.resolve(&config.plugin_name).map_err(|e| {
            ProtocolError::new(FailureKind::DetectorConfigError, e.to_string())
        })?;

        let previous = self.detector.take().map(|binding| binding.driver);
        let shared: SharedDriver = Arc::new(Mutex::new(driver));
        let task_driver = Arc::clone(&shared);
        let task_config = config.clone();
        let results = self.driver_ops_tx.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(previous) = previous {
                if let Err(finalize_error) = lock_driver(&previous).finalize() {
                    warn!(%finalize_error, "failed to finalize previous driver binding");
                }
            }
            let result = {
                let mut driver = lock_driver(&task_driver);
                driver
                    .initialize()
                    .and_then(|()| driver.initialize_detector(&task_config))
            };
            let _ = results.send(DriverOpOutcome { result });
        });

        self.pending = Some(PendingDriverOp::DetectorConfig {
            config,
            driver: shared,
        });
        Ok(())
    }

    /// Phase one of `start_session`: record the session in the store, then
    /// dispatch the driver's session setup to the blocking pool. The session
    /// becomes Active only when [`Controller::apply_driver_outcome`] sees the
    /// setup succeed.
    async fn start_session(&mut self, args: SessionArgs) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::new(
                FailureKind::StartSessionBusy,
                "start session failed, session is active",
            ));
        }
        if self.pending.is_some() {
            return Err(ProtocolError::error(
                "start session failed, a previous command is still completing",
            ));
        }
        let Some(binding) = self.detector.as_ref() else {
            return Err(ProtocolError::error(
                "start session failed, detector is not configured",
            ));
        };

        let handle = self
            .store
            .open_session(&binding.config, &args)
            .await
            .map_err(|e| ProtocolError::error(format!("start session failed: {e:#}")))?;

        let driver = Arc::clone(&binding.driver);
        let task_args = args.clone();
        let results = self.driver_ops_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = lock_driver(&driver).initialize_session(&task_args);
            let _ = results.send(DriverOpOutcome { result });
        });

        self.pending = Some(PendingDriverOp::StartSession { args, handle });
        Ok(())
    }

    /// Phase two of a driver lifecycle command: commits or unwinds the state
    /// recorded by `detector_config`/`start_session` and answers the
    /// operator.
    pub async fn apply_driver_outcome(&mut self, outcome: DriverOpOutcome) {
        let Some(pending) = self.pending.take() else {
            debug!("discarding driver result, no lifecycle command pending");
            return;
        };

        match pending {
            PendingDriverOp::DetectorConfig { config, driver } => match outcome.result {
                Ok(()) => {
                    info!(plugin = %config.plugin_name, "detector configured");
                    self.detector = Some(DetectorBinding::new(config.clone(), driver));
                    self.send(Response::DetectorConfigSuccess {
                        detector_data: config,
                    });
                }
                Err(driver_error) => {
                    self.send(ProtocolError::new(
                        FailureKind::DetectorConfigError,
                        format!("detector config failed: {driver_error}"),
                    ));
                }
            },
            PendingDriverOp::StartSession { args, handle } => match outcome.result {
                Ok(()) => {
                    self.epoch += 1;
                    self.session = Some(ActiveSession::new(args.clone(), handle, self.epoch));
                    info!(session = %args.session_name, epoch = self.epoch, "session started");
                    self.send(Response::StartSessionSuccess { args });
                }
                Err(driver_error) => {
                    if let Err(close_error) = self.store.close_session(handle).await {
                        warn!(%close_error, "store close failed while unwinding start_session");
                    }
                    self.send(ProtocolError::error(format!(
                        "start session failed: {driver_error}"
                    )));
                }
            },
        }
    }

    async fn stop_session(&mut self, session_name: String) -> Result<(), ProtocolError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ProtocolError::new(
                FailureKind::StopSessionNoexist,
                "stop session failed, no session active",
            ));
        };
        if session.args.session_name != session_name {
            return Err(ProtocolError::new(
                FailureKind::StopSessionWrongname,
                "stop session failed, wrong session name",
            ));
        }

        self.teardown_session().await;
        self.send(Response::StopSessionSuccess { session_name });
        Ok(())
    }

    fn dump_session(&mut self, session_name: String) -> Result<(), ProtocolError> {
        if self.session.is_none() {
            return Err(ProtocolError::new(
                FailureKind::DumpSessionNone,
                "dump session failed, no session active",
            ));
        }
        self.send(Response::DumpSessionSuccess {
            session_name,
            message: "dumping session to operator".to_string(),
        });
        Ok(())
    }

    fn get_status(&mut self) {
        let status = StatusReport {
            free_disk_space: sys::free_disk_space(&self.data_dir),
            session_running: self.session.is_some(),
            spectrum_index: self.session.as_ref().map_or(0, |s| s.next_index),
            detector_configured: self.detector.is_some(),
        };
        self.send(Response::GetStatusSuccess { status });
    }

    async fn sync_session(
        &mut self,
        session_name: String,
        indices_list: Vec<i64>,
        last_index: i64,
    ) -> Result<(), ProtocolError> {
        let records = self
            .store
            .query_spectra(&session_name, &indices_list, last_index)
            .await
            .map_err(|e| {
                ProtocolError::new(
                    FailureKind::SyncSessionError,
                    format!("sync session failed: {e:#}"),
                )
            })?;

        info!(session = %session_name, count = records.len(), "streaming stored spectra");
        for record in records {
            self.send(Response::Spectrum { record });
        }
        Ok(())
    }

    /// Tears the active session down: stops future ticks (no live session),
    /// finalizes the driver's session context behind any in-flight
    /// acquisition, and closes the store handle. Failures here are logged
    /// and swallowed.
    pub async fn teardown_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!(session = %session.args.session_name, "finalizing session");

        if let Some(binding) = self.detector.as_ref() {
            // The driver lock is held for the whole of a blocking acquire, so
            // finalize on the blocking pool: it runs after any in-flight
            // acquisition completes instead of stalling the event loop.
            let driver = Arc::clone(&binding.driver);
            let args = session.args.clone();
            let finalizer = tokio::task::spawn_blocking(move || {
                if let Err(finalize_error) = lock_driver(&driver).finalize_session(&args) {
                    warn!(%finalize_error, "driver session finalize failed during teardown");
                }
            });
            self.session_finalizers.push(finalizer);
        }

        if let Err(close_error) = self.store.close_session(session.handle).await {
            warn!(error = %format!("{close_error:#}"), "store close failed during teardown");
        }
    }

    /// Process shutdown: finalize any active session and wait for every
    /// session finalizer to drain, then release the detector binding. The
    /// ordering matters: the driver's session context must be torn down
    /// before the driver itself is finalized.
    pub async fn shutdown(&mut self) {
        if self.session.is_some() {
            self.teardown_session().await;
        }

        if let Some(PendingDriverOp::StartSession { handle, .. }) = self.pending.take() {
            if let Err(close_error) = self.store.close_session(handle).await {
                warn!(%close_error, "store close failed for unstarted session during shutdown");
            }
        }

        for finalizer in self.session_finalizers.drain(..) {
            if let Err(join_error) = finalizer.await {
                warn!(%join_error, "session finalize task failed");
            }
        }

        if let Some(binding) = self.detector.take() {
            let driver = binding.driver;
            let finalized = tokio::task::spawn_blocking(move || {
                lock_driver(&driver).finalize().map_err(|e| e.to_string())
            })
            .await;
            match finalized {
                Ok(Ok(())) => info!("detector driver finalized"),
                Ok(Err(finalize_error)) => {
                    warn!(%finalize_error, "driver finalize failed during shutdown")
                }
                Err(join_error) => warn!(%join_error, "driver finalize task failed"),
            }
        }
    }

    fn send(&self, message: impl Into<Outbound>) {
        send_to(&self.outbound, message);
    }
}

/// Queues an envelope for the operator. Sending never blocks the loop; if
/// the transport side is gone the envelope is dropped.
pub(crate) fn send_to(outbound: &mpsc::UnboundedSender<Outbound>, message: impl Into<Outbound>) {
    let _ = outbound.send(message.into());
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

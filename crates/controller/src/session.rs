use std::sync::{Arc, Mutex, PoisonError};

use detector::DetectorDriver;
use shared::domain::{DetectorConfig, SessionArgs};
use storage::SessionHandle;

/// The driver is shared with the blocking pool for the duration of an
/// acquisition. Single-in-flight scheduling keeps the lock uncontended.
pub type SharedDriver = Arc<Mutex<Box<dyn DetectorDriver>>>;

/// Locks the driver, recovering from a poisoned lock rather than panicking:
/// a panic inside a driver must not take the whole daemon down.
pub fn lock_driver(driver: &SharedDriver) -> std::sync::MutexGuard<'_, Box<dyn DetectorDriver>> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A configured detector: Warm state on the detector axis.
pub struct DetectorBinding {
    pub config: DetectorConfig,
    pub driver: SharedDriver,
}

impl DetectorBinding {
    pub fn new(config: DetectorConfig, driver: SharedDriver) -> Self {
        Self { config, driver }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Ready,
    InFlight,
}

/// Live session state: exists exactly while the session axis is Active.
pub struct ActiveSession {
    pub args: SessionArgs,
    pub handle: SessionHandle,
    /// Bumped on every session start; stale acquisition results carry an
    /// older epoch and are discarded instead of touching a closed handle.
    pub epoch: u64,
    /// Index the next persisted spectrum will get. 0-based, gapless.
    pub next_index: i64,
    pub consecutive_failures: u32,
    pub acquisition: AcquisitionState,
}

impl ActiveSession {
    pub fn new(args: SessionArgs, handle: SessionHandle, epoch: u64) -> Self {
        Self {
            args,
            handle,
            epoch,
            next_index: 0,
            consecutive_failures: 0,
            acquisition: AcquisitionState::Ready,
        }
    }
}

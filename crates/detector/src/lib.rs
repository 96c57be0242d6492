//! Capability interface for detector hardware and the registry that resolves
//! driver plugins by name at startup time. Unknown names fail closed.

use shared::domain::{AcquiredSpectrum, DetectorConfig, SessionArgs};
use thiserror::Error;

mod registry;
mod sim;

pub use registry::DriverRegistry;
pub use sim::SimDriver;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unknown detector plugin '{0}'")]
    UnknownPlugin(String),
    #[error("detector is not configured")]
    NotConfigured,
    #[error("hardware failure: {0}")]
    Hardware(String),
}

/// Hardware-specific detector binding. All methods are blocking; `acquire`
/// may take on the order of the requested livetime and must be invoked off
/// the dispatch thread.
pub trait DetectorDriver: Send + std::fmt::Debug {
    /// One-time driver setup after resolution.
    fn initialize(&mut self) -> Result<(), DriverError>;

    /// Applies hardware settings (voltage, gains, discriminators).
    fn initialize_detector(&mut self, config: &DetectorConfig) -> Result<(), DriverError>;

    /// Prepares the driver's own per-session context.
    fn initialize_session(&mut self, args: &SessionArgs) -> Result<(), DriverError>;

    /// Performs one blocking acquisition for the requested livetime.
    fn acquire(&mut self, args: &SessionArgs) -> Result<AcquiredSpectrum, DriverError>;

    /// Tears down the driver's per-session context.
    fn finalize_session(&mut self, args: &SessionArgs) -> Result<(), DriverError>;

    /// Releases the hardware. Called on rebind and process shutdown.
    fn finalize(&mut self) -> Result<(), DriverError>;
}

use std::{thread, time::Duration};

use shared::domain::{AcquiredSpectrum, DetectorConfig, SessionArgs};
use tracing::debug;

use crate::{DetectorDriver, DriverError};

/// Longest livetime the simulator will actually sleep for. Anything larger
/// still reports the requested livetime in the result.
const MAX_SIMULATED_WAIT_SECS: f64 = 10.0;

/// Software stand-in for a hardware probe. Produces deterministic
/// pseudo-random spectra so acquisitions are reproducible for a given
/// configuration, and honors the configured channel count.
#[derive(Debug)]
pub struct SimDriver {
    config: Option<DetectorConfig>,
    rng_state: u64,
}

impl SimDriver {
    pub fn new() -> Self {
        Self {
            config: None,
            rng_state: 0,
        }
    }

    fn next_u32(&mut self) -> u32 {
        // xorshift64; seeded from the detector settings on configuration.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 32) as u32
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorDriver for SimDriver {
    fn initialize(&mut self) -> Result<(), DriverError> {
        debug!("sim driver initialized");
        Ok(())
    }

    fn initialize_detector(&mut self, config: &DetectorConfig) -> Result<(), DriverError> {
        if config.num_channels == 0 {
            return Err(DriverError::Hardware(
                "num_channels must be positive".to_string(),
            ));
        }
        self.rng_state = 0x9e37_79b9_7f4a_7c15
            ^ (config.voltage as u64)
            ^ u64::from(config.num_channels) << 32;
        self.config = Some(config.clone());
        Ok(())
    }

    fn initialize_session(&mut self, args: &SessionArgs) -> Result<(), DriverError> {
        if self.config.is_none() {
            return Err(DriverError::NotConfigured);
        }
        debug!(session = %args.session_name, "sim session initialized");
        Ok(())
    }

    fn acquire(&mut self, args: &SessionArgs) -> Result<AcquiredSpectrum, DriverError> {
        let config = self.config.as_ref().ok_or(DriverError::NotConfigured)?;
        let num_channels = config.num_channels;

        let wait = args.livetime.clamp(0.0, MAX_SIMULATED_WAIT_SECS);
        if wait > 0.0 {
            thread::sleep(Duration::from_secs_f64(wait));
        }

        let mut channels = Vec::with_capacity(num_channels as usize);
        let mut total_count: u64 = 0;
        for _ in 0..num_channels {
            let count = self.next_u32() % 16;
            total_count += u64::from(count);
            channels.push(count);
        }

        Ok(AcquiredSpectrum {
            channels,
            num_channels,
            total_count,
            livetime: args.livetime,
            realtime: args.livetime * 1.02,
        })
    }

    fn finalize_session(&mut self, args: &SessionArgs) -> Result<(), DriverError> {
        debug!(session = %args.session_name, "sim session finalized");
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), DriverError> {
        self.config = None;
        Ok(())
    }
}

//! Background positioning telemetry. A dedicated OS thread samples a
//! [`TelemetrySource`] at a fixed period and publishes whole-sample
//! snapshots over a watch channel. Readers always see the most recent
//! complete sample and never block the sampling thread.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use shared::domain::{Position, TelemetrySample, Velocity};
use tokio::sync::watch;
use tracing::{info, warn};

/// Longest uninterrupted sleep on the sampling thread. Bounds how long
/// shutdown waits for the thread to notice the stop flag, independent of
/// the sampling period.
const STOP_POLL_PERIOD: Duration = Duration::from_millis(20);

/// Produces one position/velocity/time sample per call. Implemented by the
/// GPS receiver binding in the field and by [`SimulatedGps`] elsewhere.
pub trait TelemetrySource: Send + 'static {
    fn sample(&mut self) -> TelemetrySample;
}

/// Read side of the telemetry snapshot. Cheap to clone; consumers keep one
/// and call [`TelemetryReader::latest`] whenever a spectrum needs tagging.
#[derive(Clone)]
pub struct TelemetryReader {
    rx: watch::Receiver<TelemetrySample>,
}

impl TelemetryReader {
    pub fn latest(&self) -> TelemetrySample {
        *self.rx.borrow()
    }
}

/// Owns the sampling thread for the process lifetime.
pub struct TelemetryProvider {
    reader: TelemetryReader,
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl TelemetryProvider {
    /// Starts the sampling thread. The first sample is taken synchronously so
    /// readers never observe an uninitialized snapshot.
    pub fn start(mut source: impl TelemetrySource, period: Duration) -> std::io::Result<Self> {
        let (tx, rx) = watch::channel(source.sample());
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let join = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || {
                info!("telemetry thread started");
                while !stop_flag.load(Ordering::Relaxed) {
                    // Sleep in short slices so a stop request never waits
                    // out a full sampling period.
                    let deadline = Instant::now() + period;
                    while !stop_flag.load(Ordering::Relaxed) && Instant::now() < deadline {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        thread::sleep(remaining.min(STOP_POLL_PERIOD));
                    }
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    if tx.send(source.sample()).is_err() {
                        break;
                    }
                }
                info!("telemetry thread stopped");
            })?;

        Ok(Self {
            reader: TelemetryReader { rx },
            stop,
            join: Some(join),
        })
    }

    pub fn reader(&self) -> TelemetryReader {
        self.reader.clone()
    }

    /// Signals the thread and joins it. Called once at process shutdown.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("telemetry thread panicked before shutdown");
            }
        }
    }
}

impl Drop for TelemetryProvider {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Random-walk position source used when no GPS receiver is attached.
pub struct SimulatedGps {
    position: Position,
    velocity: Velocity,
    step: u64,
}

impl SimulatedGps {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: Position {
                latitude,
                latitude_error: 2.5,
                longitude,
                longitude_error: 2.5,
                altitude: 100.0,
                altitude_error: 5.0,
            },
            velocity: Velocity {
                track: 90.0,
                track_error: 1.0,
                speed: 1.5,
                speed_error: 0.2,
                climb: 0.0,
                climb_error: 0.1,
            },
            step: 0,
        }
    }
}

impl Default for SimulatedGps {
    fn default() -> Self {
        Self::new(59.91, 10.75)
    }
}

impl TelemetrySource for SimulatedGps {
    fn sample(&mut self) -> TelemetrySample {
        self.step = self.step.wrapping_add(1);
        // Slow eastward drift, enough to make consecutive samples distinct.
        self.position.longitude += 2e-6;
        self.position.altitude += if self.step % 2 == 0 { 0.1 } else { -0.1 };
        TelemetrySample {
            position: self.position,
            velocity: self.velocity,
            time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        calls: u64,
    }

    impl TelemetrySource for CountingSource {
        fn sample(&mut self) -> TelemetrySample {
            self.calls += 1;
            let mut sample = TelemetrySample::zero(Utc::now());
            sample.position.altitude = self.calls as f64;
            sample
        }
    }

    #[test]
    fn reader_sees_initial_sample_immediately() {
        let provider = TelemetryProvider::start(CountingSource { calls: 0 }, Duration::from_secs(60))
            .expect("provider");
        let reader = provider.reader();
        assert_eq!(reader.latest().position.altitude, 1.0);
        provider.shutdown();
    }

    #[test]
    fn snapshots_advance_while_running() {
        let provider =
            TelemetryProvider::start(CountingSource { calls: 0 }, Duration::from_millis(5))
                .expect("provider");
        let reader = provider.reader();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if reader.latest().position.altitude > 1.0 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "snapshot never advanced"
            );
            thread::sleep(Duration::from_millis(5));
        }
        provider.shutdown();
    }

    #[test]
    fn shutdown_returns_promptly_despite_a_long_period() {
        let provider = TelemetryProvider::start(CountingSource { calls: 0 }, Duration::from_secs(60))
            .expect("provider");
        let requested = Instant::now();
        provider.shutdown();
        assert!(
            requested.elapsed() < Duration::from_secs(1),
            "shutdown waited out the sampling period"
        );
    }

    #[test]
    fn simulated_gps_produces_distinct_consecutive_samples() {
        let mut gps = SimulatedGps::default();
        let first = gps.sample();
        let second = gps.sample();
        assert!(second.position.longitude > first.position.longitude);
    }
}

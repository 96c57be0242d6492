use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detector hardware settings, supplied once per `detector_config` command
/// and held immutable until the detector is reconfigured while idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub plugin_name: String,
    pub voltage: i64,
    pub coarse_gain: f64,
    pub fine_gain: f64,
    pub num_channels: u32,
    pub lld: f64,
    pub uld: f64,
}

/// Operator-supplied session parameters. Anything beyond the name and the
/// per-acquisition livetime is carried opaquely and echoed back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArgs {
    pub session_name: String,
    pub livetime: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub latitude_error: f64,
    pub longitude: f64,
    pub longitude_error: f64,
    pub altitude: f64,
    pub altitude_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub track: f64,
    pub track_error: f64,
    pub speed: f64,
    pub speed_error: f64,
    pub climb: f64,
    pub climb_error: f64,
}

/// One position/velocity/time snapshot. Replaced atomically by the telemetry
/// provider; read-only everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(flatten)]
    pub position: Position,
    #[serde(flatten)]
    pub velocity: Velocity,
    pub time: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn zero(time: DateTime<Utc>) -> Self {
        Self {
            position: Position::default(),
            velocity: Velocity::default(),
            time,
        }
    }
}

/// Raw output of one driver acquisition, before telemetry and indexing are
/// merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredSpectrum {
    pub channels: Vec<u32>,
    pub num_channels: u32,
    pub total_count: u64,
    pub livetime: f64,
    pub realtime: f64,
}

/// A persisted spectrum: driver output plus telemetry and the per-session
/// monotonic index. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRecord {
    pub session_name: String,
    pub index: i64,
    #[serde(flatten)]
    pub telemetry: TelemetrySample,
    pub livetime: f64,
    pub realtime: f64,
    pub total_count: u64,
    pub num_channels: u32,
    pub channels: Vec<u32>,
}

impl SpectrumRecord {
    pub fn assemble(
        session_name: &str,
        index: i64,
        spectrum: AcquiredSpectrum,
        telemetry: TelemetrySample,
    ) -> Self {
        Self {
            session_name: session_name.to_string(),
            index,
            telemetry,
            livetime: spectrum.livetime,
            realtime: spectrum.realtime,
            total_count: spectrum.total_count,
            num_channels: spectrum.num_channels,
            channels: spectrum.channels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub free_disk_space: u64,
    pub session_running: bool,
    pub spectrum_index: i64,
    pub detector_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn spectrum_record_serializes_flat_telemetry_fields() {
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let record = SpectrumRecord::assemble(
            "survey-7",
            3,
            AcquiredSpectrum {
                channels: vec![1, 0, 4],
                num_channels: 3,
                total_count: 5,
                livetime: 1.0,
                realtime: 1.1,
            },
            TelemetrySample::zero(time),
        );

        let value = serde_json::to_value(&record).expect("json");
        assert_eq!(value["session_name"], "survey-7");
        assert_eq!(value["index"], 3);
        assert_eq!(value["latitude"], 0.0);
        assert_eq!(value["climb_error"], 0.0);
        assert_eq!(value["channels"], serde_json::json!([1, 0, 4]));
        assert!(value.get("telemetry").is_none(), "telemetry must flatten");
        assert!(value.get("position").is_none(), "position must flatten");
    }

    #[test]
    fn session_args_carry_opaque_extras() {
        let raw = serde_json::json!({
            "session_name": "survey-7",
            "livetime": 2.5,
            "operator": "field-unit-2",
            "comment": "road sweep"
        });
        let args: SessionArgs = serde_json::from_value(raw.clone()).expect("args");
        assert_eq!(args.session_name, "survey-7");
        assert_eq!(args.extra["operator"], "field-unit-2");

        let echoed = serde_json::to_value(&args).expect("echo");
        assert_eq!(echoed, raw);
    }
}

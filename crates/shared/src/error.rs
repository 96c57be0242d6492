use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable tag carried in the `command` field of a failure
/// envelope. Every rejected command maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Error,
    DetectorConfigBusy,
    DetectorConfigError,
    StartSessionBusy,
    StopSessionNoexist,
    StopSessionWrongname,
    DumpSessionNone,
    SyncSessionError,
}

impl FailureKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FailureKind::Error => "error",
            FailureKind::DetectorConfigBusy => "detector_config_busy",
            FailureKind::DetectorConfigError => "detector_config_error",
            FailureKind::StartSessionBusy => "start_session_busy",
            FailureKind::StopSessionNoexist => "stop_session_noexist",
            FailureKind::StopSessionWrongname => "stop_session_wrongname",
            FailureKind::DumpSessionNone => "dump_session_none",
            FailureKind::SyncSessionError => "sync_session_error",
        }
    }
}

/// A rejected command. Never mutates state; always reported to the operator
/// with its tag and a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.tag())]
pub struct ProtocolError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProtocolError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }
}

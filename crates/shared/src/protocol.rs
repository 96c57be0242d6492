use serde::{Deserialize, Serialize};

use crate::{
    domain::{DetectorConfig, SessionArgs, SpectrumRecord, StatusReport},
    error::{FailureKind, ProtocolError},
};

/// Inbound command envelope: one JSON object per datagram, dispatched on the
/// mandatory `command` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    DetectorConfig {
        detector_data: DetectorConfig,
    },
    StartSession {
        #[serde(flatten)]
        args: SessionArgs,
    },
    StopSession {
        session_name: String,
    },
    DumpSession {
        session_name: String,
    },
    GetStatus,
    SyncSession {
        session_name: String,
        indices_list: Vec<i64>,
        last_index: i64,
    },
}

/// Outbound success envelopes. The serialized `command` field carries the
/// `<original>_success` tag, or `spectrum` for streamed records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Response {
    DetectorConfigSuccess {
        #[serde(flatten)]
        detector_data: DetectorConfig,
    },
    StartSessionSuccess {
        #[serde(flatten)]
        args: SessionArgs,
    },
    StopSessionSuccess {
        session_name: String,
    },
    DumpSessionSuccess {
        session_name: String,
        message: String,
    },
    GetStatusSuccess {
        #[serde(flatten)]
        status: StatusReport,
    },
    Spectrum {
        #[serde(flatten)]
        record: SpectrumRecord,
    },
}

/// Outbound failure envelope, `command` set to the failure tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub command: FailureKind,
    pub message: String,
}

impl From<ProtocolError> for FailureEnvelope {
    fn from(err: ProtocolError) -> Self {
        Self {
            command: err.kind,
            message: err.message,
        }
    }
}

/// Anything the daemon sends back to the operator.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response(Response),
    Failure(FailureEnvelope),
}

impl From<Response> for Outbound {
    fn from(response: Response) -> Self {
        Outbound::Response(response)
    }
}

impl From<ProtocolError> for Outbound {
    fn from(err: ProtocolError) -> Self {
        Outbound::Failure(err.into())
    }
}

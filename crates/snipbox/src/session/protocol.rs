//! Session wire protocol
//!
//! JSON text frames tagged by `type`. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Action, JobId, JobRequest};
use crate::report::Report;
use crate::runner::JobError;
use crate::session::SessionId;
use crate::toolchain::OutputStream;

/// Frame sent by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Job(JobRequest),
    /// Bytes for the stdin of a running debug or trace job
    Input { data: String },
    Cancel,
    Ping,
    Pong,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Frame sent by the server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        session_id: SessionId,
    },
    Ping,
    Pong,
    Started {
        session_id: SessionId,
        job_id: JobId,
        action: Action,
    },
    Output {
        session_id: SessionId,
        job_id: JobId,
        stream: OutputStream,
        data: String,
    },
    Result {
        session_id: SessionId,
        job_id: JobId,
        status: u16,
        report: Report,
    },
    Failed {
        session_id: SessionId,
        job_id: JobId,
        kind: String,
        status: u16,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<Report>,
    },
    Cancelled {
        session_id: SessionId,
        job_id: JobId,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    Closing {
        reason: String,
    },
}

impl ServerMessage {
    /// Protocol-level error without a job attached
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
            kind: None,
        }
    }

    /// Protocol-level error carrying a machine-readable kind
    pub fn error_kind(kind: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
            kind: Some(kind.to_string()),
        }
    }

    /// Terminal message of a job that ended in an error
    pub fn failed(session_id: SessionId, job_id: JobId, error: JobError) -> Self {
        let kind = error.kind().to_string();
        let status = error.status_code();
        let message = error.client_message();
        let report = match error {
            JobError::CompileFailed { report } | JobError::ToolFailed { report, .. } => {
                Some(report)
            }
            _ => None,
        };
        ServerMessage::Failed {
            session_id,
            job_id,
            kind,
            status,
            message,
            report,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

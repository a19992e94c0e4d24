use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RecorderError;
use crate::session::SessionStatus;

/// Opaque identifier of a capturable host context (a browser tab)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token granting the media worker access to one context's audio
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureHandle(pub String);

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requests sent from the control panel to the session coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PanelRequest {
    #[serde(rename_all = "camelCase")]
    StartRecording {
        target_context_id: ContextId,
        include_microphone: bool,
    },
    StopRecording,
}

/// Synchronous acknowledgment of a panel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl From<&Result<(), RecorderError>> for ControlResponse {
    fn from(result: &Result<(), RecorderError>) -> Self {
        match result {
            Ok(()) => Self::accepted(),
            Err(e) => Self::rejected(e.to_string()),
        }
    }
}

/// Commands sent from the coordinator to the media worker (fire-and-forget)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerCommand {
    #[serde(rename = "WORKER_START", rename_all = "camelCase")]
    Start {
        capture_handle: CaptureHandle,
        include_microphone: bool,
    },
    #[serde(rename = "WORKER_STOP")]
    Stop,
}

/// Events reported by the media worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    /// Recording finished (or nothing was recording) and resources are released
    #[serde(rename = "WORKER_COMPLETED")]
    Completed,
    /// Terminal failure; resources are released and no artifact was produced
    #[serde(rename = "WORKER_ERROR")]
    Error { reason: String },
    /// Non-fatal problem; recording continues
    #[serde(rename = "WORKER_NOTICE")]
    Notice { reason: String },
}

/// Broadcast from the coordinator whenever session state or status text changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "STATE_CHANGED", rename_all = "camelCase")]
pub struct StateChanged {
    pub recording: bool,
    pub status: SessionStatus,
    pub status_text: String,
}

impl StateChanged {
    pub fn new(status: SessionStatus, status_text: impl Into<String>) -> Self {
        Self {
            recording: status.is_recording(),
            status,
            status_text: status_text.into(),
        }
    }
}

/// Platform lifecycle signals that may force a teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    #[serde(rename_all = "camelCase")]
    ContextClosed { context_id: ContextId },
    #[serde(rename_all = "camelCase")]
    ContextNavigated { context_id: ContextId, url: String },
    Startup,
    Installed,
}

/// Why a forced teardown happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    ContextClosed,
    ContextNavigated,
    Startup,
    Installed,
}

impl TeardownReason {
    pub fn status_text(self) -> &'static str {
        match self {
            Self::ContextClosed => "Tab closed. Recording stopped.",
            Self::ContextNavigated => "Tab navigated. Recording stopped.",
            Self::Startup | Self::Installed => "Ready to record.",
        }
    }
}

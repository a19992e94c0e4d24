use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::ContextId;

/// Lifecycle status of the recording session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionStatus {
    /// Only an active session counts as recording
    pub fn is_recording(self) -> bool {
        self == Self::Active
    }

    /// Transitional states where the panel shows neither button
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// The single recording session owned by the coordinator
#[derive(Debug, Clone)]
pub struct Session {
    /// Correlates log lines across the coordinator and worker
    pub recording_id: Uuid,
    pub target_context_id: ContextId,
    /// Fixed for the lifetime of the session
    pub include_microphone: bool,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(target_context_id: ContextId, include_microphone: bool) -> Self {
        Self {
            recording_id: Uuid::new_v4(),
            target_context_id,
            include_microphone,
            status: SessionStatus::Starting,
            started_at: Utc::now(),
        }
    }
}

/// Point-in-time view of the coordinator, returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub is_recording: bool,
    pub status_text: String,
    pub recording_id: Option<Uuid>,
    pub target_context_id: Option<ContextId>,
    pub include_microphone: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the session started
    pub duration_secs: f64,
}

impl SessionSnapshot {
    pub fn new(session: Option<&Session>, status_text: &str) -> Self {
        match session {
            Some(session) => Self {
                status: session.status,
                is_recording: session.status.is_recording(),
                status_text: status_text.to_string(),
                recording_id: Some(session.recording_id),
                target_context_id: Some(session.target_context_id.clone()),
                include_microphone: session.include_microphone,
                started_at: Some(session.started_at),
                duration_secs: (Utc::now() - session.started_at).num_milliseconds() as f64
                    / 1000.0,
            },
            None => Self {
                status: SessionStatus::Idle,
                is_recording: false,
                status_text: status_text.to_string(),
                recording_id: None,
                target_context_id: None,
                include_microphone: false,
                started_at: None,
                duration_secs: 0.0,
            },
        }
    }
}

use thiserror::Error;

use crate::audio::AudioStreamSource;

/// Failures surfaced by the recording system
///
/// `AlreadyActive` and `NotActive` are synchronous rejections returned only to
/// the immediate caller. Everything else ends in a full session reset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("Already recording.")]
    AlreadyActive,

    #[error("Not recording.")]
    NotActive,

    /// The capture target could not provide a capture handle
    #[error("{0}")]
    CaptureUnavailable(String),

    /// A tab or microphone stream could not be opened
    #[error("{message}")]
    AcquisitionFailure {
        stream: AudioStreamSource,
        message: String,
    },

    #[error("{0}")]
    EncodingFailure(String),

    #[error("Media worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Session coordinator unavailable")]
    CoordinatorUnavailable,
}

impl RecorderError {
    /// Whether the error is a local rejection that leaves the session untouched
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AlreadyActive | Self::NotActive)
    }
}

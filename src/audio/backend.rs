use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RecorderError;
use crate::protocol::CaptureHandle;

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStreamSource {
    /// Audio captured from the host tab
    Tab,
    /// Microphone input
    Microphone,
    /// Output of the mixing route
    Mixed,
}

impl fmt::Display for AudioStreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab => write!(f, "tab"),
            Self::Microphone => write!(f, "microphone"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Sample rate and channel layout of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream was opened
    pub timestamp_ms: u64,
    /// Which stream produced the frame
    pub source: AudioStreamSource,
}

impl AudioFrame {
    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// A platform track that keeps a capture device open until stopped
pub trait MediaTrack: Send + Sync {
    /// Stop the track and release the underlying device. Must be idempotent.
    fn stop(&mut self);

    fn label(&self) -> &str;
}

/// An acquired input stream: a frame receiver plus the tracks feeding it
///
/// Tracks are stopped on `stop_tracks` or when the stream is dropped, so a
/// stream can never outlive the session that acquired it.
pub struct MediaStream {
    source: AudioStreamSource,
    format: StreamFormat,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    tracks: Vec<Box<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(
        source: AudioStreamSource,
        format: StreamFormat,
        frames: mpsc::Receiver<AudioFrame>,
        track: Box<dyn MediaTrack>,
    ) -> Self {
        Self {
            source,
            format,
            frames: Some(frames),
            tracks: vec![track],
        }
    }

    pub fn source(&self) -> AudioStreamSource {
        self.source
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Take the frame receiver for routing. Returns `None` once taken.
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn stop_tracks(&mut self) {
        for mut track in self.tracks.drain(..) {
            debug!("Stopping {} track: {}", self.source, track.label());
            track.stop();
        }
        self.frames = None;
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("source", &self.source)
            .field("format", &self.format)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Error reported by the platform media layer, identified by name
/// (`NotAllowedError`, `NotFoundError`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    NotAllowed,
    NotFound,
    NotReadable,
    Other,
}

impl DeviceError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DeviceErrorKind {
        match self.name.as_str() {
            "NotAllowedError" | "SecurityError" => DeviceErrorKind::NotAllowed,
            "NotFoundError" | "OverconstrainedError" => DeviceErrorKind::NotFound,
            "NotReadableError" | "AbortError" => DeviceErrorKind::NotReadable,
            _ => DeviceErrorKind::Other,
        }
    }

    /// Translate into the recorder taxonomy with a user-facing message
    pub fn into_acquisition_failure(self, stream: AudioStreamSource) -> RecorderError {
        let message = match stream {
            AudioStreamSource::Microphone => match self.kind() {
                DeviceErrorKind::NotAllowed => {
                    "Microphone permission denied. Please grant microphone access.".to_string()
                }
                DeviceErrorKind::NotFound => "No microphone found on your device.".to_string(),
                DeviceErrorKind::NotReadable => {
                    "Microphone is being used by another application.".to_string()
                }
                DeviceErrorKind::Other => "Microphone access failed.".to_string(),
            },
            _ => format!("Tab audio capture failed: {}", self.message),
        };

        RecorderError::AcquisitionFailure { stream, message }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for DeviceError {}

/// Media-device capability provider
///
/// Implementations open live streams; each returned `MediaStream` owns the
/// tracks that must be stopped to release the device.
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open the audio of a captured tab using a handle issued by the capture provider
    async fn tab_audio(&self, handle: &CaptureHandle) -> Result<MediaStream, DeviceError>;

    /// Open the default microphone
    async fn microphone(&self) -> Result<MediaStream, DeviceError>;
}

/// Local playback sink used to keep captured tab audio audible
pub trait PlaybackSink: Send {
    fn write(&mut self, frame: &AudioFrame) -> Result<(), DeviceError>;
}

/// Playback output capability provider
pub trait AudioOutput: Send + Sync {
    fn open_playback(&self, format: StreamFormat) -> Result<Box<dyn PlaybackSink>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTrack(Arc<AtomicUsize>);

    impl MediaTrack for CountingTrack {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn label(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_stop_tracks_is_idempotent() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::channel(1);
        let mut stream = MediaStream::new(
            AudioStreamSource::Tab,
            StreamFormat::default(),
            rx,
            Box::new(CountingTrack(stops.clone())),
        );

        stream.stop_tracks();
        stream.stop_tracks();
        drop(stream);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_tracks() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::channel(1);
        let stream = MediaStream::new(
            AudioStreamSource::Microphone,
            StreamFormat::default(),
            rx,
            Box::new(CountingTrack(stops.clone())),
        );

        drop(stream);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_microphone_errors_translate_to_messages() {
        let denied = DeviceError::new("NotAllowedError", "Permission dismissed")
            .into_acquisition_failure(AudioStreamSource::Microphone);
        assert_eq!(
            denied.to_string(),
            "Microphone permission denied. Please grant microphone access."
        );

        let missing = DeviceError::new("NotFoundError", "Requested device not found")
            .into_acquisition_failure(AudioStreamSource::Microphone);
        assert_eq!(missing.to_string(), "No microphone found on your device.");

        let busy = DeviceError::new("NotReadableError", "Could not start audio source")
            .into_acquisition_failure(AudioStreamSource::Microphone);
        assert_eq!(
            busy.to_string(),
            "Microphone is being used by another application."
        );
    }

    #[test]
    fn test_tab_errors_keep_platform_message() {
        let err = DeviceError::new("AbortError", "Tab is not audible")
            .into_acquisition_failure(AudioStreamSource::Tab);

        assert_eq!(err.to_string(), "Tab audio capture failed: Tab is not audible");
        assert!(matches!(
            err,
            RecorderError::AcquisitionFailure {
                stream: AudioStreamSource::Tab,
                ..
            }
        ));
    }
}

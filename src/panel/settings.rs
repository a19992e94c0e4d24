use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::audio::{DeviceErrorKind, MediaDevices};
use crate::preferences::{PreferenceStore, PreferenceUpdate};

/// Mean absolute amplitude above which the probe counts a frame as sound
pub const SOUND_THRESHOLD: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    SoundDetected,
    NoSound,
    Failed,
}

impl ProbeOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::SoundDetected => "Microphone test successful! Sound detected.",
            Self::NoSound => {
                "No sound detected. Please check your microphone settings and try speaking louder."
            }
            Self::Failed => "Microphone test failed. Please check your microphone connection.",
        }
    }
}

/// The separate surface through which microphone permission is granted
pub struct PermissionSettings {
    devices: Arc<dyn MediaDevices>,
    preferences: Arc<dyn PreferenceStore>,
}

impl PermissionSettings {
    pub fn new(devices: Arc<dyn MediaDevices>, preferences: Arc<dyn PreferenceStore>) -> Self {
        Self {
            devices,
            preferences,
        }
    }

    /// Whether a microphone grant is on record
    pub async fn microphone_granted(&self) -> bool {
        match self.preferences.load().await {
            Ok(prefs) => prefs.microphone_permission_granted,
            Err(e) => {
                warn!("Could not check microphone permission status: {:#}", e);
                false
            }
        }
    }

    /// Open the microphone once to obtain the grant, then release it
    pub async fn request_microphone(&self) -> PermissionOutcome {
        let outcome = match self.devices.microphone().await {
            Ok(mut stream) => {
                stream.stop_tracks();
                info!("Microphone permission granted successfully");
                PermissionOutcome::Granted
            }
            Err(e) => {
                error!("Microphone permission denied: {}", e);
                let message = match e.kind() {
                    DeviceErrorKind::NotAllowed => {
                        "Microphone access was denied. Please click \"Allow\" when prompted, or check your browser settings."
                    }
                    DeviceErrorKind::NotFound => {
                        "No microphone found. Please connect a microphone and try again."
                    }
                    DeviceErrorKind::NotReadable => {
                        "Microphone is being used by another application. Please close other apps using the microphone and try again."
                    }
                    DeviceErrorKind::Other => "Microphone permission was denied.",
                };
                PermissionOutcome::Denied {
                    message: message.to_string(),
                }
            }
        };

        let granted = outcome == PermissionOutcome::Granted;
        if let Err(e) = self
            .preferences
            .merge(PreferenceUpdate::permission(
                granted,
                Utc::now().timestamp_millis(),
            ))
            .await
        {
            error!("Failed to store permission status: {:#}", e);
        }

        outcome
    }

    /// Listen for up to `max_duration` and report whether any sound came through
    pub async fn probe_microphone(&self, max_duration: Duration) -> ProbeOutcome {
        let mut stream = match self.devices.microphone().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone test failed: {}", e);
                return ProbeOutcome::Failed;
            }
        };

        let Some(mut frames) = stream.take_frames() else {
            stream.stop_tracks();
            return ProbeOutcome::Failed;
        };

        let deadline = Instant::now() + max_duration;
        let mut outcome = ProbeOutcome::NoSound;

        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            if frame.samples.is_empty() {
                continue;
            }
            let level = frame
                .samples
                .iter()
                .map(|&s| (s as f64).abs())
                .sum::<f64>()
                / frame.samples.len() as f64;

            if level > SOUND_THRESHOLD {
                outcome = ProbeOutcome::SoundDetected;
                break;
            }
        }

        stream.stop_tracks();
        info!("Microphone test finished: {:?}", outcome);
        outcome
    }
}

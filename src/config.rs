use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{MixerConfig, StreamFormat};
use crate::worker::WorkerSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "tab-audio-recorder".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory where finished recordings are saved
    pub output_dir: String,
    /// Encoder MIME types in order of preference; the encoder's own default
    /// is used when none of them is supported
    pub preferred_mime_types: Vec<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Duration of each captured frame in milliseconds
    pub frame_duration_ms: u64,
    /// Frames waiting longer than this for their mixing partner are emitted alone
    pub mixer_max_buffer_delay_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: "recordings".to_string(),
            preferred_mime_types: vec![
                "audio/webm;codecs=opus".to_string(),
                "audio/ogg;codecs=opus".to_string(),
            ],
            sample_rate: 48000,
            channels: 2,
            frame_duration_ms: 20,
            mixer_max_buffer_delay_ms: 200,
        }
    }
}

impl RecordingConfig {
    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            preferred_mime_types: self.preferred_mime_types.clone(),
            mixer: MixerConfig {
                sample_rate: self.sample_rate,
                channels: self.channels,
                max_buffer_delay_ms: self.mixer_max_buffer_delay_ms,
            },
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// JSON file holding persisted preferences
    pub path: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: "state/preferences.json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then `TAB_RECORDER__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TAB_RECORDER").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/tab-audio-recorder").unwrap();

        assert_eq!(cfg.service.http.port, 7878);
        assert_eq!(cfg.recording.sample_rate, 48000);
        assert_eq!(cfg.recording.preferred_mime_types.len(), 2);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[recording]\nsample_rate = 16000\nchannels = 1\n").unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(cfg.recording.sample_rate, 16000);
        assert_eq!(cfg.recording.channels, 1);
        assert_eq!(cfg.recording.frame_duration_ms, 20);
        assert_eq!(cfg.preferences.path, "state/preferences.json");
    }

    #[test]
    fn test_worker_settings_follow_recording_format() {
        let recording = RecordingConfig {
            sample_rate: 16000,
            channels: 1,
            ..Default::default()
        };

        let settings = recording.worker_settings();
        assert_eq!(settings.mixer.sample_rate, 16000);
        assert_eq!(settings.mixer.channels, 1);
        assert_eq!(settings.mixer.max_buffer_delay_ms, 200);
    }
}

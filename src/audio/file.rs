use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::backend::{AudioFrame, AudioStreamSource, StreamFormat};

/// A decoded 16-bit WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;
        Self::decode(reader, path.display().to_string())
    }

    /// Decode WAV data already in memory, e.g. a finished recording artifact
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let reader = WavReader::new(bytes).context("Failed to parse WAV data")?;
        Self::decode(reader, "<memory>".to_string())
    }

    fn decode<R: Read>(reader: WavReader<R>, path: String) -> Result<Self> {
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Unsupported WAV encoding: {}-bit {:?}, expected 16-bit PCM",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path,
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Split the samples into consecutive frames of `frame_ms` milliseconds
    pub fn frames(&self, frame_ms: u64, source: AudioStreamSource) -> Vec<AudioFrame> {
        let per_frame = (self.sample_rate as u64 * frame_ms / 1000) as usize * self.channels as usize;
        if per_frame == 0 {
            return Vec::new();
        }

        self.samples
            .chunks(per_frame)
            .enumerate()
            .map(|(index, chunk)| AudioFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: index as u64 * frame_ms,
                source,
            })
            .collect()
    }
}

use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use super::backend::{AudioFrame, StreamFormat};

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Unsupported MIME type: {0}")]
    Unsupported(String),

    #[error("Stream format changed mid-recording: expected {expected_rate}Hz/{expected_channels}ch, got {actual_rate}Hz/{actual_channels}ch")]
    FormatChanged {
        expected_rate: u32,
        expected_channels: u16,
        actual_rate: u32,
        actual_channels: u16,
    },

    #[error("Encoder already finalized")]
    Finalized,

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("Encoder buffer unavailable: {0}")]
    Buffer(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Streaming audio encoder producing a container byte stream
///
/// `encode` may emit chunks as data becomes available; `finalize` consumes the
/// encoder and returns the trailing bytes. Concatenating every emitted chunk
/// followed by the final bytes yields the complete file.
pub trait Encoder: Send {
    fn mime_type(&self) -> &str;

    fn encode(&mut self, frame: &AudioFrame) -> Result<Option<Vec<u8>>, EncoderError>;

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, EncoderError>;
}

/// Encoder capability provider
pub trait EncoderFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// MIME type used when none of the preferred types is supported
    fn default_mime_type(&self) -> &str;

    fn create(
        &self,
        mime_type: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn Encoder>, EncoderError>;
}

/// Pick the first supported preferred type, falling back to the factory default
pub fn negotiate_mime_type(factory: &dyn EncoderFactory, preferred: &[String]) -> String {
    for mime_type in preferred {
        if factory.is_type_supported(mime_type) {
            return mime_type.clone();
        }
        warn!("{} is not supported, trying next option", mime_type);
    }

    let fallback = factory.default_mime_type().to_string();
    info!("Using encoder default: {}", fallback);
    fallback
}

/// In-memory write target shared between the WAV writer and the encoder
///
/// hound consumes its writer on finalize, so the bytes are read back through
/// a second handle.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedBuffer {
    fn lock(&self) -> io::Result<MutexGuard<'_, Cursor<Vec<u8>>>> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "encoder buffer poisoned"))
    }

    fn take_bytes(&self) -> io::Result<Vec<u8>> {
        let mut cursor = self.lock()?;
        Ok(std::mem::take(cursor.get_mut()))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl Seek for SharedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.lock()?.seek(pos)
    }
}

pub const WAV_MIME_TYPE: &str = "audio/wav";
const WAV_MIME_ALIASES: [&str; 3] = ["audio/wav", "audio/wave", "audio/x-wav"];

/// 16-bit PCM WAV encoder
pub struct WavEncoder {
    mime_type: String,
    format: StreamFormat,
    buffer: SharedBuffer,
    writer: Option<hound::WavWriter<SharedBuffer>>,
    samples_written: usize,
}

impl WavEncoder {
    pub fn new(mime_type: &str, format: StreamFormat) -> Result<Self, EncoderError> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let buffer = SharedBuffer::default();
        let writer = hound::WavWriter::new(buffer.clone(), spec)?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            format,
            buffer,
            writer: Some(writer),
            samples_written: 0,
        })
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }
}

impl Encoder for WavEncoder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        if frame.format() != self.format {
            return Err(EncoderError::FormatChanged {
                expected_rate: self.format.sample_rate,
                expected_channels: self.format.channels,
                actual_rate: frame.sample_rate,
                actual_channels: frame.channels,
            });
        }

        let writer = self.writer.as_mut().ok_or(EncoderError::Finalized)?;
        for &sample in &frame.samples {
            writer.write_sample(sample)?;
        }

        self.samples_written += frame.samples.len();

        // The RIFF header carries the data length, so nothing is emitted
        // until finalize
        Ok(None)
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        let writer = self.writer.take().ok_or(EncoderError::Finalized)?;
        writer.finalize()?;

        info!(
            "WAV encoder finalized: {} samples ({}Hz, {} channels)",
            self.samples_written, self.format.sample_rate, self.format.channels
        );

        Ok(self.buffer.take_bytes()?)
    }
}

/// Encoder factory backed by hound; only WAV is supported
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoderFactory;

impl EncoderFactory for WavEncoderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or("").trim();
        WAV_MIME_ALIASES.contains(&essence)
    }

    fn default_mime_type(&self) -> &str {
        WAV_MIME_TYPE
    }

    fn create(
        &self,
        mime_type: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn Encoder>, EncoderError> {
        if !self.is_type_supported(mime_type) {
            return Err(EncoderError::Unsupported(mime_type.to_string()));
        }

        Ok(Box::new(WavEncoder::new(mime_type, format)?))
    }
}

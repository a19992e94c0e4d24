// Audio mixer for combining tab audio and microphone streams
//
// The mixer buffers frames from each stream, aligns them by timestamp,
// and mixes the samples together using simple addition with clipping.
// A frame that waits longer than the configured delay for its partner is
// emitted alone so a silent source never stalls the recording.

use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioStreamSource, StreamFormat};
use super::routing::{RoutingNode, ROUTE_BUFFER_FRAMES};

/// Configuration for audio mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Output sample rate; inputs are resampled to it
    pub sample_rate: u32,
    /// Output channel count; inputs are remixed to it
    pub channels: u16,
    /// Maximum buffering delay in milliseconds (default: 200ms)
    pub max_buffer_delay_ms: u64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            max_buffer_delay_ms: 200,
        }
    }
}

impl MixerConfig {
    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

/// Audio mixer that combines the tab and microphone streams
pub struct AudioMixer {
    config: MixerConfig,
    /// Buffers for each audio source type
    buffers: HashMap<AudioStreamSource, VecDeque<AudioFrame>>,
    /// Latest timestamp seen on any input
    newest_ms: u64,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Audio mixer initialized: {}Hz, {} channels",
            config.sample_rate, config.channels
        );

        let mut buffers = HashMap::new();
        buffers.insert(AudioStreamSource::Tab, VecDeque::new());
        buffers.insert(AudioStreamSource::Microphone, VecDeque::new());

        Self {
            config,
            buffers,
            newest_ms: 0,
        }
    }

    /// Buffer a frame based on its source type
    pub fn push(&mut self, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate || frame.channels != self.config.channels {
            warn!(
                "Frame format mismatch: expected {}Hz/{}ch, got {}Hz/{}ch. Dropping frame.",
                self.config.sample_rate, self.config.channels, frame.sample_rate, frame.channels
            );
            return;
        }

        self.newest_ms = self.newest_ms.max(frame.timestamp_ms);

        if let Some(buffer) = self.buffers.get_mut(&frame.source) {
            buffer.push_back(frame);
        }
    }

    /// Next output frame, if one is ready
    ///
    /// Mixes when every input has a frame buffered; otherwise emits the oldest
    /// frame alone once it has waited longer than the buffer delay.
    pub fn next_ready(&mut self) -> Option<AudioFrame> {
        if self.buffers.values().all(|buffer| !buffer.is_empty()) {
            return self.mix_next_chunk();
        }

        let cutoff = self.newest_ms.saturating_sub(self.config.max_buffer_delay_ms);
        let (source, timestamp_ms) = self
            .buffers
            .iter()
            .filter_map(|(source, buffer)| buffer.front().map(|f| (*source, f.timestamp_ms)))
            .filter(|&(_, timestamp_ms)| timestamp_ms < cutoff)
            .min_by_key(|&(_, timestamp_ms)| timestamp_ms)?;

        debug!(
            "No partner for {:?} frame at {}ms, emitting alone",
            source, timestamp_ms
        );
        self.buffers
            .get_mut(&source)
            .and_then(|buffer| buffer.pop_front())
            .map(Self::relabel)
    }

    /// Emit whatever is buffered, mixing where both inputs still have data
    pub fn flush(&mut self) -> Option<AudioFrame> {
        self.mix_next_chunk()
    }

    /// Mix the next chunk of audio from all source buffers
    ///
    /// Returns None if there's no data available in any buffer
    fn mix_next_chunk(&mut self) -> Option<AudioFrame> {
        let frames_to_mix: Vec<AudioFrame> = self
            .buffers
            .values_mut()
            .filter_map(|buffer| buffer.pop_front())
            .collect();

        match frames_to_mix.len() {
            0 => None,
            1 => frames_to_mix.into_iter().next().map(Self::relabel),
            _ => Some(self.mix_multiple_frames(&frames_to_mix)),
        }
    }

    fn relabel(mut frame: AudioFrame) -> AudioFrame {
        frame.source = AudioStreamSource::Mixed;
        frame
    }

    /// Mix multiple audio frames together by adding their samples
    fn mix_multiple_frames(&self, frames: &[AudioFrame]) -> AudioFrame {
        // Use the earliest timestamp
        let timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);

        // Determine output length (use the longest frame)
        let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);
        let mut mixed_samples = Vec::with_capacity(max_len);

        for i in 0..max_len {
            let sum: i32 = frames
                .iter()
                .map(|frame| frame.samples.get(i).copied().unwrap_or(0) as i32)
                .sum();

            // Clip to prevent overflow
            mixed_samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }

        AudioFrame {
            samples: mixed_samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms,
            source: AudioStreamSource::Mixed,
        }
    }
}

/// Convert a frame to `target`, remixing channels and resampling as needed
///
/// Downmixing averages channels; upmixing repeats them. Resampling is linear
/// interpolation within the frame.
pub fn convert_frame(frame: AudioFrame, target: StreamFormat) -> AudioFrame {
    if frame.format() == target {
        return frame;
    }

    let remixed = remix_channels(&frame.samples, frame.channels, target.channels);
    let samples = resample(
        &remixed,
        target.channels,
        frame.sample_rate,
        target.sample_rate,
    );

    AudioFrame {
        samples,
        sample_rate: target.sample_rate,
        channels: target.channels,
        timestamp_ms: frame.timestamp_ms,
        source: frame.source,
    }
}

fn remix_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let (from, to) = (from as usize, to as usize);
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            out.extend((0..to).map(|channel| frame[channel % from]));
        }
    }
    out
}

fn resample(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    let in_frames = samples.len() / channels;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || in_frames == 0 {
        return samples.to_vec();
    }

    let out_frames = (in_frames as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let position = i as f64 * step;
        let index = (position as usize).min(in_frames - 1);
        let next = (index + 1).min(in_frames - 1);
        let frac = position - index as f64;

        for channel in 0..channels {
            let a = samples[index * channels + channel] as f64;
            let b = samples[next * channels + channel] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        }
    }
    out
}

/// Build a mixing route combining both inputs into one output stream
///
/// Inputs in another format are converted to the mixer format first.
pub fn route(
    tab: (mpsc::Receiver<AudioFrame>, StreamFormat),
    mic: (mpsc::Receiver<AudioFrame>, StreamFormat),
    config: MixerConfig,
) -> (RoutingNode, mpsc::Receiver<AudioFrame>) {
    let (mut tab_rx, tab_format) = tab;
    let (mut mic_rx, mic_format) = mic;
    let target = config.format();

    for (source, format) in [
        (AudioStreamSource::Tab, tab_format),
        (AudioStreamSource::Microphone, mic_format),
    ] {
        if format != target {
            info!(
                "Converting {} audio from {}Hz/{}ch to {}Hz/{}ch",
                source, format.sample_rate, format.channels, target.sample_rate, target.channels
            );
        }
    }

    let (tx, rx) = mpsc::channel(ROUTE_BUFFER_FRAMES);
    let mut mixer = AudioMixer::new(config);

    let node = RoutingNode::spawn("mixer", async move {
        let mut tab_open = true;
        let mut mic_open = true;

        while tab_open || mic_open {
            tokio::select! {
                frame = tab_rx.recv(), if tab_open => match frame {
                    Some(frame) => mixer.push(convert_frame(frame, target)),
                    None => tab_open = false,
                },
                frame = mic_rx.recv(), if mic_open => match frame {
                    Some(frame) => mixer.push(convert_frame(frame, target)),
                    None => mic_open = false,
                },
            }

            // With one input closed, everything left is emitted unpaired
            let next = if tab_open && mic_open {
                mixer.next_ready()
            } else {
                mixer.flush()
            };

            if let Some(frame) = next {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }

        while let Some(frame) = mixer.flush() {
            if tx.send(frame).await.is_err() {
                return;
            }
        }

        debug!("Mixing route finished");
    });

    info!("Streams combined via mixing route");

    (node, rx)
}

// In-process stand-in for the browser: tabs, tab capture, microphone and
// speakers. Audio is synthesized (or read from a WAV file) in real time on a
// tokio interval so the rest of the system sees live streams.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{CaptureProvider, TargetContext};
use crate::audio::routing::ROUTE_BUFFER_FRAMES;
use crate::audio::{
    AudioFile, AudioFrame, AudioOutput, AudioStreamSource, DeviceError, MediaDevices, MediaStream,
    MediaTrack, PlaybackSink, StreamFormat,
};
use crate::protocol::{CaptureHandle, ContextId};

const DEFAULT_TAB_TONE_HZ: f32 = 440.0;
const DEFAULT_MIC_TONE_HZ: f32 = 220.0;
const DEFAULT_AMPLITUDE: i16 = 4000;

/// What a simulated tab plays
#[derive(Clone)]
pub enum TabAudio {
    Tone { frequency_hz: f32, amplitude: i16 },
    File(Arc<AudioFile>),
}

impl Default for TabAudio {
    fn default() -> Self {
        Self::Tone {
            frequency_hz: DEFAULT_TAB_TONE_HZ,
            amplitude: DEFAULT_AMPLITUDE,
        }
    }
}

/// Microphone behavior, mirroring the platform error names it produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneState {
    /// Opens and produces a tone of the given amplitude (0 is silence)
    Available { amplitude: i16 },
    /// `NotAllowedError`
    Denied,
    /// `NotFoundError`
    Missing,
    /// `NotReadableError`
    Busy,
}

struct Tab {
    url: String,
    audio: TabAudio,
}

struct BrowserState {
    tabs: HashMap<ContextId, Tab>,
    handles: HashMap<CaptureHandle, ContextId>,
    next_tab: u64,
    next_handle: u64,
    microphone: MicrophoneState,
    tab_capture_error: Option<String>,
    playback_available: bool,
}

/// Simulated browser implementing every capture capability
#[derive(Clone)]
pub struct SimulatedBrowser {
    state: Arc<Mutex<BrowserState>>,
    format: StreamFormat,
    frame_ms: u64,
    live_tracks: Arc<AtomicUsize>,
    playback_frames: Arc<AtomicUsize>,
}

impl SimulatedBrowser {
    pub fn new(format: StreamFormat, frame_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrowserState {
                tabs: HashMap::new(),
                handles: HashMap::new(),
                next_tab: 1,
                next_handle: 1,
                microphone: MicrophoneState::Available {
                    amplitude: DEFAULT_AMPLITUDE,
                },
                tab_capture_error: None,
                playback_available: true,
            })),
            format,
            frame_ms: frame_ms.max(1),
            live_tracks: Arc::new(AtomicUsize::new(0)),
            playback_frames: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn open_tab(&self, url: impl Into<String>) -> ContextId {
        self.open_tab_with_audio(url, TabAudio::default())
    }

    pub fn open_tab_with_audio(&self, url: impl Into<String>, audio: TabAudio) -> ContextId {
        let url = url.into();
        let mut state = self.lock();
        let id = ContextId::new(format!("tab-{}", state.next_tab));
        state.next_tab += 1;

        info!("Opened tab {} ({})", id, url);
        state.tabs.insert(id.clone(), Tab { url, audio });
        id
    }

    pub fn tab(&self, id: &ContextId) -> Option<TargetContext> {
        self.lock().tabs.get(id).map(|tab| TargetContext {
            id: id.clone(),
            url: tab.url.clone(),
        })
    }

    pub fn navigate(&self, id: &ContextId, url: impl Into<String>) -> Result<()> {
        let mut state = self.lock();
        let tab = state
            .tabs
            .get_mut(id)
            .ok_or_else(|| anyhow!("No tab with id {}", id))?;
        tab.url = url.into();
        debug!("Tab {} navigated to {}", id, tab.url);
        Ok(())
    }

    pub fn close_tab(&self, id: &ContextId) -> Result<()> {
        let mut state = self.lock();
        if state.tabs.remove(id).is_none() {
            bail!("No tab with id {}", id);
        }
        state.handles.retain(|_, ctx| ctx != id);
        debug!("Tab {} closed", id);
        Ok(())
    }

    pub fn set_microphone(&self, microphone: MicrophoneState) {
        self.lock().microphone = microphone;
    }

    /// Make tab capture fail with `AbortError` and this message
    pub fn fail_tab_capture(&self, message: Option<String>) {
        self.lock().tab_capture_error = message;
    }

    pub fn set_playback_available(&self, available: bool) {
        self.lock().playback_available = available;
    }

    /// Tracks opened and not yet stopped
    pub fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    /// Frames written to any playback sink so far
    pub fn playback_frames(&self) -> usize {
        self.playback_frames.load(Ordering::SeqCst)
    }

    fn open_stream(&self, source: AudioStreamSource, label: String, audio: TabAudio) -> MediaStream {
        let (tx, rx) = mpsc::channel(ROUTE_BUFFER_FRAMES);
        let frame_ms = self.frame_ms;
        let format = match &audio {
            TabAudio::File(file) => file.format(),
            TabAudio::Tone { .. } => self.format,
        };

        let task = tokio::spawn(async move {
            match audio {
                TabAudio::Tone {
                    frequency_hz,
                    amplitude,
                } => generate_tone(tx, format, frame_ms, source, frequency_hz, amplitude).await,
                TabAudio::File(file) => play_file(tx, &file, frame_ms, source).await,
            }
        });

        self.live_tracks.fetch_add(1, Ordering::SeqCst);
        let track = TaskTrack {
            label,
            task: Some(task),
            live: self.live_tracks.clone(),
        };

        MediaStream::new(source, format, rx, Box::new(track))
    }
}

async fn generate_tone(
    tx: mpsc::Sender<AudioFrame>,
    format: StreamFormat,
    frame_ms: u64,
    source: AudioStreamSource,
    frequency_hz: f32,
    amplitude: i16,
) {
    let per_channel = (format.sample_rate as u64 * frame_ms / 1000) as usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
    let mut position: u64 = 0;
    let mut timestamp_ms = 0;

    loop {
        ticker.tick().await;

        let mut samples = Vec::with_capacity(per_channel * format.channels as usize);
        for _ in 0..per_channel {
            let t = position as f32 / format.sample_rate as f32;
            let value = (amplitude as f32 * (2.0 * PI * frequency_hz * t).sin()) as i16;
            for _ in 0..format.channels {
                samples.push(value);
            }
            position += 1;
        }

        let frame = AudioFrame {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
            timestamp_ms,
            source,
        };
        if tx.send(frame).await.is_err() {
            break;
        }
        timestamp_ms += frame_ms;
    }
}

async fn play_file(
    tx: mpsc::Sender<AudioFrame>,
    file: &AudioFile,
    frame_ms: u64,
    source: AudioStreamSource,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));

    for frame in file.frames(frame_ms, source) {
        ticker.tick().await;
        if tx.send(frame).await.is_err() {
            return;
        }
    }

    debug!("Finished playing {}", file.path);
}

/// Track backed by a generator task
struct TaskTrack {
    label: String,
    task: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl MediaTrack for TaskTrack {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for TaskTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl CaptureProvider for SimulatedBrowser {
    async fn capture_handle(&self, target: &ContextId) -> Result<CaptureHandle> {
        let mut state = self.lock();
        let tab = state
            .tabs
            .get(target)
            .ok_or_else(|| anyhow!("No tab with id {}", target))?;
        if tab.url.starts_with("chrome://") {
            bail!("Cannot capture a chrome:// page");
        }

        let handle = CaptureHandle(format!("stream-{}-{}", target, state.next_handle));
        state.next_handle += 1;
        state.handles.insert(handle.clone(), target.clone());

        debug!("Issued capture handle {} for {}", handle, target);
        Ok(handle)
    }
}

#[async_trait]
impl MediaDevices for SimulatedBrowser {
    async fn tab_audio(&self, handle: &CaptureHandle) -> Result<MediaStream, DeviceError> {
        let (target, audio) = {
            let mut state = self.lock();
            if let Some(message) = state.tab_capture_error.clone() {
                return Err(DeviceError::new("AbortError", message));
            }

            let target = state.handles.remove(handle).ok_or_else(|| {
                DeviceError::new("InvalidStateError", "Capture handle is no longer valid")
            })?;
            let tab = state
                .tabs
                .get(&target)
                .ok_or_else(|| DeviceError::new("AbortError", "Captured tab was closed"))?;
            (target, tab.audio.clone())
        };

        info!("Tab audio stream opened for {}", target);
        Ok(self.open_stream(AudioStreamSource::Tab, format!("tab:{}", target), audio))
    }

    async fn microphone(&self) -> Result<MediaStream, DeviceError> {
        let microphone = self.lock().microphone;
        match microphone {
            MicrophoneState::Available { amplitude } => {
                info!("Microphone stream opened");
                Ok(self.open_stream(
                    AudioStreamSource::Microphone,
                    "microphone:default".to_string(),
                    TabAudio::Tone {
                        frequency_hz: DEFAULT_MIC_TONE_HZ,
                        amplitude,
                    },
                ))
            }
            MicrophoneState::Denied => Err(DeviceError::new("NotAllowedError", "Permission denied")),
            MicrophoneState::Missing => Err(DeviceError::new(
                "NotFoundError",
                "Requested device not found",
            )),
            MicrophoneState::Busy => Err(DeviceError::new(
                "NotReadableError",
                "Could not start audio source",
            )),
        }
    }
}

/// Playback sink that discards audio and counts frames
struct CountingSink {
    frames: Arc<AtomicUsize>,
}

impl PlaybackSink for CountingSink {
    fn write(&mut self, _frame: &AudioFrame) -> Result<(), DeviceError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl AudioOutput for SimulatedBrowser {
    fn open_playback(&self, format: StreamFormat) -> Result<Box<dyn PlaybackSink>, DeviceError> {
        if !self.lock().playback_available {
            return Err(DeviceError::new(
                "NotSupportedError",
                "No audio output device",
            ));
        }

        debug!(
            "Playback opened: {}Hz, {} channels",
            format.sample_rate, format.channels
        );
        Ok(Box::new(CountingSink {
            frames: self.playback_frames.clone(),
        }))
    }
}

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::artifact::{Artifact, DownloadSink};
use super::stream_set::StreamSet;
use crate::audio::{
    mixer, negotiate_mime_type, routing, AudioFrame, AudioOutput, AudioStreamSource, Encoder,
    EncoderFactory, MediaDevices, MediaStream, MixerConfig, StreamFormat,
};
use crate::error::RecorderError;
use crate::protocol::{CaptureHandle, WorkerCommand, WorkerEvent};

/// Command mailbox depth; the coordinator sends at most a start and a stop
const COMMAND_BUFFER: usize = 16;

/// Recording parameters shared by every session the worker runs
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Encoder MIME types in order of preference
    pub preferred_mime_types: Vec<String>,
    pub mixer: MixerConfig,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            preferred_mime_types: vec![
                "audio/webm;codecs=opus".to_string(),
                "audio/ogg;codecs=opus".to_string(),
            ],
            mixer: MixerConfig::default(),
        }
    }
}

/// Capability providers the worker records with
#[derive(Clone)]
pub struct WorkerDeps {
    pub devices: Arc<dyn MediaDevices>,
    pub output: Arc<dyn AudioOutput>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub downloads: Arc<dyn DownloadSink>,
    pub settings: WorkerSettings,
}

/// Encoder failure reported by a pump task
#[derive(Debug)]
struct EncoderFault {
    generation: u64,
    reason: String,
}

/// What the pump hands back once it has seen the stop signal
struct PumpOutput {
    encoder: Box<dyn Encoder>,
    chunks: Vec<Vec<u8>>,
    frames: usize,
}

type PumpResult = Result<PumpOutput, String>;

/// An in-progress recording
struct Recording {
    generation: u64,
    streams: StreamSet,
    stop_tx: Option<oneshot::Sender<()>>,
    pump: JoinHandle<PumpResult>,
}

impl Drop for Recording {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Media worker: acquires streams, routes and encodes them, saves the result
///
/// Runs as its own task and talks to the outside world only through its
/// command mailbox and the event channel. At most one recording exists at a
/// time; every exit path releases its `StreamSet`.
pub struct MediaWorker {
    deps: WorkerDeps,
    events: mpsc::UnboundedSender<WorkerEvent>,
    faults: mpsc::UnboundedSender<EncoderFault>,
    recording: Option<Recording>,
    generation: u64,
}

impl MediaWorker {
    /// Spawn a worker context. Dropping the returned sender closes it.
    pub fn spawn(
        deps: WorkerDeps,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> (mpsc::Sender<WorkerCommand>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();

        let worker = Self {
            deps,
            events,
            faults: fault_tx,
            recording: None,
            generation: 0,
        };

        let task = tokio::spawn(worker.run(command_rx, fault_rx));
        (command_tx, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        mut faults: mpsc::UnboundedReceiver<EncoderFault>,
    ) {
        info!("Media worker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WorkerCommand::Start { capture_handle, include_microphone }) => {
                        self.start(capture_handle, include_microphone).await;
                    }
                    Some(WorkerCommand::Stop) => self.stop().await,
                    None => break,
                },
                Some(fault) = faults.recv() => self.on_fault(fault),
            }
        }

        if self.recording.take().is_some() {
            warn!("Worker context closed mid-recording, discarding capture");
        }
        info!("Media worker closed");
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            warn!("Coordinator is gone, dropping worker event");
        }
    }

    fn fail(&self, reason: String) {
        error!("Recording failed: {}", reason);
        self.emit(WorkerEvent::Error { reason });
    }

    async fn start(&mut self, capture_handle: CaptureHandle, include_microphone: bool) {
        if self.recording.is_some() {
            warn!("Recording already in progress.");
            return;
        }

        info!(
            "Starting capture for {} (microphone: {})",
            capture_handle, include_microphone
        );

        let mut streams = match self.acquire(&capture_handle, include_microphone).await {
            Some(streams) => streams,
            None => return,
        };

        let (frames, encoder) = match self.build_pipeline(&mut streams) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                streams.release();
                self.fail(format!("Core recording setup failed: {}", e));
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            "Encoder started: {} (generation {})",
            encoder.mime_type(),
            generation
        );

        let pump = tokio::spawn(pump(
            generation,
            encoder,
            frames,
            stop_rx,
            self.faults.clone(),
        ));

        self.recording = Some(Recording {
            generation,
            streams,
            stop_tx: Some(stop_tx),
            pump,
        });
    }

    /// Open tab audio and, if requested, the microphone concurrently
    ///
    /// Returns `None` after emitting a terminal error when nothing usable was
    /// acquired. A single failed input is reported as a notice.
    async fn acquire(
        &self,
        capture_handle: &CaptureHandle,
        include_microphone: bool,
    ) -> Option<StreamSet> {
        let devices = &self.deps.devices;

        let (tab, mic) = if include_microphone {
            let (tab, mic) =
                futures::future::join(devices.tab_audio(capture_handle), devices.microphone())
                    .await;
            (tab, Some(mic))
        } else {
            (devices.tab_audio(capture_handle).await, None)
        };

        let tab = tab.map_err(|e| {
            warn!("Tab audio acquisition failed: {}", e);
            e.into_acquisition_failure(AudioStreamSource::Tab)
        });
        let mic = mic.map(|result| {
            result.map_err(|e| {
                warn!("Microphone acquisition failed: {}", e);
                e.into_acquisition_failure(AudioStreamSource::Microphone)
            })
        });

        let mut streams = StreamSet::default();
        match (tab, mic) {
            (Ok(tab), None) => streams.tab_audio = Some(tab),
            (Ok(tab), Some(Ok(mic))) => {
                streams.tab_audio = Some(tab);
                streams.mic_audio = Some(mic);
            }
            (Ok(tab), Some(Err(mic_err))) => {
                self.emit(WorkerEvent::Notice {
                    reason: format!("{} Continuing with tab audio only.", mic_err),
                });
                streams.tab_audio = Some(tab);
            }
            (Err(tab_err), Some(Ok(mic))) => {
                self.emit(WorkerEvent::Notice {
                    reason: format!("{} Continuing with microphone only.", tab_err),
                });
                streams.mic_audio = Some(mic);
            }
            (Err(tab_err), None) => {
                self.fail(tab_err.to_string());
                return None;
            }
            (Err(tab_err), Some(Err(mic_err))) => {
                self.fail(format!(
                    "No audio sources available to record. {} {}",
                    tab_err, mic_err
                ));
                return None;
            }
        }

        Some(streams)
    }

    /// Wire monitor playback, the recording stream and the encoder
    fn build_pipeline(
        &self,
        streams: &mut StreamSet,
    ) -> Result<(mpsc::Receiver<AudioFrame>, Box<dyn Encoder>), RecorderError> {
        let tab_input = match streams.tab_audio.as_mut() {
            Some(tab) => {
                let format = tab.format();
                let frames = take_frames(tab)?;
                match routing::monitor(frames, format, self.deps.output.as_ref()) {
                    Ok((node, frames)) => {
                        streams.monitor = Some(node);
                        Some((frames, format))
                    }
                    Err((e, frames)) => {
                        warn!("Tab audio playback unavailable: {}", e);
                        Some((frames, format))
                    }
                }
            }
            None => None,
        };

        let mic_input = match streams.mic_audio.as_mut() {
            Some(mic) => Some((take_frames(mic)?, mic.format())),
            None => None,
        };

        let (frames, format): (mpsc::Receiver<AudioFrame>, StreamFormat) =
            match (tab_input, mic_input) {
                (Some(tab), Some(mic)) => {
                    let (node, frames) = mixer::route(tab, mic, self.deps.settings.mixer.clone());
                    streams.mixer = Some(node);
                    (frames, self.deps.settings.mixer.format())
                }
                (Some(input), None) | (None, Some(input)) => input,
                (None, None) => {
                    return Err(RecorderError::EncodingFailure(
                        "no input stream to record".to_string(),
                    ))
                }
            };

        let encoders = self.deps.encoders.as_ref();
        let mime_type = negotiate_mime_type(encoders, &self.deps.settings.preferred_mime_types);
        let encoder = encoders
            .create(&mime_type, format)
            .map_err(|e| RecorderError::EncodingFailure(e.to_string()))?;

        Ok((frames, encoder))
    }

    async fn stop(&mut self) {
        let Some(mut recording) = self.recording.take() else {
            warn!("MediaRecorder not active or already stopped.");
            self.emit(WorkerEvent::Completed);
            return;
        };

        info!("Stopping recording (generation {})", recording.generation);

        if let Some(stop_tx) = recording.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let outcome = match (&mut recording.pump).await {
            Ok(outcome) => outcome,
            Err(e) => Err(format!("encoder task failed: {}", e)),
        };
        recording.streams.release();

        let saved = match outcome {
            Ok(output) => self.save(output).await,
            Err(reason) => Err(format!("MediaRecorder error: {}", reason)),
        };

        match saved {
            Ok(path) => {
                info!("Recording stopped, file saved to {}", path.display());
                self.emit(WorkerEvent::Completed);
            }
            Err(reason) => self.fail(reason),
        }
    }

    async fn save(&self, output: PumpOutput) -> Result<PathBuf, String> {
        let PumpOutput {
            encoder,
            mut chunks,
            frames,
        } = output;

        let mime_type = encoder.mime_type().to_string();
        let tail = encoder
            .finalize()
            .map_err(|e| format!("Failed to finalize recording: {}", e))?;
        chunks.push(tail);

        let artifact = Artifact::assemble(chunks, &mime_type);
        let file_name = artifact.file_name(Utc::now());
        debug!(
            "Assembled {} from {} frames ({} bytes)",
            file_name,
            frames,
            artifact.len()
        );

        self.deps
            .downloads
            .save(&file_name, &artifact)
            .await
            .map_err(|e| format!("Failed to save recording: {:#}", e))
    }

    fn on_fault(&mut self, fault: EncoderFault) {
        let current = self.recording.as_ref().map(|r| r.generation);
        if current != Some(fault.generation) {
            debug!(
                "Ignoring encoder fault from generation {}",
                fault.generation
            );
            return;
        }

        if let Some(mut recording) = self.recording.take() {
            recording.streams.release();
        }
        self.fail(format!("MediaRecorder error: {}", fault.reason));
    }
}

fn take_frames(stream: &mut MediaStream) -> Result<mpsc::Receiver<AudioFrame>, RecorderError> {
    stream.take_frames().ok_or_else(|| {
        RecorderError::EncodingFailure(format!("{} stream has no frame source", stream.source()))
    })
}

/// Feed the recording stream into the encoder until told to stop
///
/// Frames already queued when the stop signal arrives are still encoded. An
/// encoder error is reported on `faults` and ends the pump.
async fn pump(
    generation: u64,
    mut encoder: Box<dyn Encoder>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut stop_rx: oneshot::Receiver<()>,
    faults: mpsc::UnboundedSender<EncoderFault>,
) -> PumpResult {
    let mut chunks = Vec::new();
    let mut count = 0usize;
    let mut input_open = true;

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            frame = frames.recv(), if input_open => frame,
        };

        match frame {
            Some(frame) => {
                if let Err(reason) = encode(encoder.as_mut(), &frame, &mut chunks) {
                    let _ = faults.send(EncoderFault {
                        generation,
                        reason: reason.clone(),
                    });
                    return Err(reason);
                }
                count += 1;
            }
            None => {
                debug!("Recording stream ended, waiting for stop");
                input_open = false;
            }
        }
    }

    while let Ok(frame) = frames.try_recv() {
        encode(encoder.as_mut(), &frame, &mut chunks)?;
        count += 1;
    }

    Ok(PumpOutput {
        encoder,
        chunks,
        frames: count,
    })
}

fn encode(
    encoder: &mut dyn Encoder,
    frame: &AudioFrame,
    chunks: &mut Vec<Vec<u8>>,
) -> Result<(), String> {
    match encoder.encode(frame) {
        Ok(Some(chunk)) if !chunk.is_empty() => chunks.push(chunk),
        Ok(_) => {}
        Err(e) => return Err(e.to_string()),
    }
    Ok(())
}

// Shared fixtures for integration tests
//
// Wires a coordinator and media worker onto the simulated browser with an
// in-memory download sink and an instrumented WAV encoder.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tab_audio_recorder::audio::{
    AudioFrame, Encoder, EncoderError, EncoderFactory, MixerConfig, StreamFormat,
    WavEncoderFactory,
};
use tab_audio_recorder::preferences::{MemoryPreferenceStore, PreferenceStore, Preferences};
use tab_audio_recorder::protocol::StateChanged;
use tab_audio_recorder::session::{CoordinatorHandle, SessionCoordinator};
use tab_audio_recorder::worker::{Artifact, DownloadSink, WorkerDeps, WorkerHost, WorkerSettings};
use tab_audio_recorder::SimulatedBrowser;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_format() -> StreamFormat {
    StreamFormat {
        sample_rate: 8000,
        channels: 1,
    }
}

pub fn test_browser() -> SimulatedBrowser {
    SimulatedBrowser::new(test_format(), 10)
}

pub fn test_settings() -> WorkerSettings {
    WorkerSettings {
        preferred_mime_types: vec![
            "audio/webm;codecs=opus".to_string(),
            "audio/ogg;codecs=opus".to_string(),
        ],
        mixer: MixerConfig {
            sample_rate: 8000,
            channels: 1,
            max_buffer_delay_ms: 50,
        },
    }
}

/// Download sink that keeps artifacts in memory
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, Artifact)>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn fail_saves(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<(String, Artifact)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl DownloadSink for MemorySink {
    async fn save(&self, file_name: &str, artifact: &Artifact) -> Result<PathBuf> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("Download blocked");
        }
        self.saved
            .lock()
            .unwrap()
            .push((file_name.to_string(), artifact.clone()));
        Ok(Path::new("memory").join(file_name))
    }
}

/// WAV encoder factory that counts encoders and can inject a fault
#[derive(Default)]
pub struct TestEncoderFactory {
    pub created: AtomicUsize,
    pub finalized: Arc<AtomicUsize>,
    fail_after: Mutex<Option<usize>>,
}

impl TestEncoderFactory {
    /// Make every encoder fail once it has seen `frames` frames
    pub fn fail_after(&self, frames: usize) {
        *self.fail_after.lock().unwrap() = Some(frames);
    }
}

impl EncoderFactory for TestEncoderFactory {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        WavEncoderFactory.is_type_supported(mime_type)
    }

    fn default_mime_type(&self) -> &str {
        WavEncoderFactory.default_mime_type()
    }

    fn create(
        &self,
        mime_type: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn Encoder>, EncoderError> {
        let inner = WavEncoderFactory.create(mime_type, format)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestEncoder {
            inner,
            frames: 0,
            fail_after: *self.fail_after.lock().unwrap(),
            finalized: self.finalized.clone(),
        }))
    }
}

struct TestEncoder {
    inner: Box<dyn Encoder>,
    frames: usize,
    fail_after: Option<usize>,
    finalized: Arc<AtomicUsize>,
}

impl Encoder for TestEncoder {
    fn mime_type(&self) -> &str {
        self.inner.mime_type()
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Option<Vec<u8>>, EncoderError> {
        if self.fail_after.is_some_and(|limit| self.frames >= limit) {
            return Err(EncoderError::Failed("EncodingError".to_string()));
        }
        self.frames += 1;
        self.inner.encode(frame)
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, EncoderError> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        self.inner.finalize()
    }
}

/// Worker dependencies over the given browser
pub fn worker_deps(
    browser: &SimulatedBrowser,
    encoders: Arc<TestEncoderFactory>,
    downloads: Arc<MemorySink>,
) -> WorkerDeps {
    WorkerDeps {
        devices: Arc::new(browser.clone()),
        output: Arc::new(browser.clone()),
        encoders,
        downloads,
        settings: test_settings(),
    }
}

/// A running coordinator plus handles on everything it talks to
pub struct Harness {
    pub browser: SimulatedBrowser,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub downloads: Arc<MemorySink>,
    pub encoders: Arc<TestEncoderFactory>,
    pub coordinator: CoordinatorHandle,
    task: JoinHandle<()>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_preferences(Preferences::default())
    }

    pub fn with_preferences(initial: Preferences) -> Self {
        let browser = test_browser();
        let preferences = Arc::new(MemoryPreferenceStore::new(initial));
        let downloads = Arc::new(MemorySink::default());
        let encoders = Arc::new(TestEncoderFactory::default());

        let (worker, worker_events) =
            WorkerHost::new(worker_deps(&browser, encoders.clone(), downloads.clone()));
        let prefs: Arc<dyn PreferenceStore> = preferences.clone();
        let (coordinator, task) =
            SessionCoordinator::new(Arc::new(browser.clone()), worker, prefs).spawn(worker_events);

        Self {
            browser,
            preferences,
            downloads,
            encoders,
            coordinator,
            task,
        }
    }

    pub async fn is_recording_persisted(&self) -> bool {
        self.preferences.load().await.unwrap().is_recording
    }

    pub async fn shutdown(self) {
        let Self {
            coordinator, task, ..
        } = self;
        drop(coordinator);
        tokio::time::timeout(WAIT, task)
            .await
            .expect("coordinator did not stop")
            .unwrap();
    }
}

/// Wait for a broadcast whose status text starts with `prefix`
pub async fn wait_for_text(
    updates: &mut broadcast::Receiver<StateChanged>,
    prefix: &str,
) -> StateChanged {
    let wait = async {
        loop {
            match updates.recv().await {
                Ok(message) if message.status_text.starts_with(prefix) => return message,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("broadcast closed: {}", e),
            }
        }
    };

    tokio::time::timeout(WAIT, wait)
        .await
        .unwrap_or_else(|_| panic!("no status starting with {:?}", prefix))
}

/// Poll until `condition` holds
pub async fn eventually(condition: impl Fn() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(WAIT, wait)
        .await
        .expect("condition not met in time");
}

// Integration tests for the media worker
//
// The worker is driven directly through its command channel; events are read
// from the channel the coordinator would normally consume.

mod common;

use common::{eventually, test_browser, worker_deps, MemorySink, TestEncoderFactory, WAIT};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tab_audio_recorder::platform::{MicrophoneState, TabAudio};
use tab_audio_recorder::protocol::{CaptureHandle, WorkerCommand, WorkerEvent};
use tab_audio_recorder::worker::{MediaWorker, WorkerHost};
use tab_audio_recorder::{AudioFile, CaptureProvider, SimulatedBrowser};
use tokio::sync::mpsc;

struct Fixture {
    browser: SimulatedBrowser,
    downloads: Arc<MemorySink>,
    encoders: Arc<TestEncoderFactory>,
    commands: mpsc::Sender<WorkerCommand>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_worker() -> Fixture {
    let browser = test_browser();
    let downloads = Arc::new(MemorySink::default());
    let encoders = Arc::new(TestEncoderFactory::default());
    let (events_tx, events) = mpsc::unbounded_channel();

    let (commands, task) = MediaWorker::spawn(
        worker_deps(&browser, encoders.clone(), downloads.clone()),
        events_tx,
    );

    Fixture {
        browser,
        downloads,
        encoders,
        commands,
        events,
        task,
    }
}

impl Fixture {
    async fn handle_for(&self, url: &str) -> CaptureHandle {
        let tab = self.browser.open_tab(url);
        self.browser.capture_handle(&tab).await.unwrap()
    }

    async fn start(&self, capture_handle: CaptureHandle, include_microphone: bool) {
        self.commands
            .send(WorkerCommand::Start {
                capture_handle,
                include_microphone,
            })
            .await
            .unwrap();
    }

    async fn next_event(&mut self) -> WorkerEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("no worker event")
            .expect("event channel closed")
    }
}

#[tokio::test]
async fn test_stop_without_recording_completes_immediately() {
    let mut f = spawn_worker();

    f.commands.send(WorkerCommand::Stop).await.unwrap();

    assert_eq!(f.next_event().await, WorkerEvent::Completed);
    assert_eq!(f.downloads.count(), 0);
}

#[tokio::test]
async fn test_tab_only_recording_produces_wav() {
    let mut f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;

    f.start(handle, false).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.browser.live_tracks(), 1);

    f.commands.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(f.next_event().await, WorkerEvent::Completed);

    let saved = f.downloads.saved();
    assert_eq!(saved.len(), 1);
    let audio = AudioFile::from_bytes(&saved[0].1.bytes).unwrap();
    assert_eq!(audio.channels, 1);
    // Roughly 200ms of 8kHz audio
    assert!(audio.samples.len() >= 800, "got {} samples", audio.samples.len());

    assert_eq!(f.browser.live_tracks(), 0);
    assert!(f.browser.playback_frames() > 0, "tab audio stays audible");
}

#[tokio::test]
async fn test_second_start_is_ignored() {
    let mut f = spawn_worker();
    let first = f.handle_for("https://example.com/a").await;
    let second = f.handle_for("https://example.com/b").await;

    f.start(first, false).await;
    f.start(second, false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.commands.send(WorkerCommand::Stop).await.unwrap();

    assert_eq!(f.next_event().await, WorkerEvent::Completed);
    assert_eq!(f.encoders.created.load(Ordering::SeqCst), 1);
    assert_eq!(f.downloads.count(), 1);
    assert!(f.events.try_recv().is_err());
}

#[tokio::test]
async fn test_tab_and_microphone_are_mixed() {
    let mut f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;

    f.start(handle, true).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(f.browser.live_tracks(), 2);

    f.commands.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(f.next_event().await, WorkerEvent::Completed);

    let saved = f.downloads.saved();
    let audio = AudioFile::from_bytes(&saved[0].1.bytes).unwrap();
    assert!(!audio.samples.is_empty());

    // Either tone alone peaks at 4000; only the sum goes higher
    let peak = audio.samples.iter().copied().max().unwrap();
    assert!(peak > 4000, "peak {} shows no mixing", peak);
    assert_eq!(f.browser.live_tracks(), 0);
}

#[tokio::test]
async fn test_failed_tab_falls_back_to_microphone() {
    let mut f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;
    f.browser
        .fail_tab_capture(Some("Tab is not audible".to_string()));

    f.start(handle, true).await;

    match f.next_event().await {
        WorkerEvent::Notice { reason } => {
            assert_eq!(
                reason,
                "Tab audio capture failed: Tab is not audible Continuing with microphone only."
            );
        }
        other => panic!("expected notice, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    f.commands.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(f.next_event().await, WorkerEvent::Completed);
    assert_eq!(f.downloads.count(), 1);
}

#[tokio::test]
async fn test_busy_microphone_message() {
    let mut f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;
    f.browser.set_microphone(MicrophoneState::Busy);

    f.start(handle, true).await;

    assert_eq!(
        f.next_event().await,
        WorkerEvent::Notice {
            reason: "Microphone is being used by another application. Continuing with tab audio only."
                .to_string()
        }
    );
}

#[tokio::test]
async fn test_monitor_failure_is_silent() {
    let mut f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;
    f.browser.set_playback_available(false);

    f.start(handle, false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.commands.send(WorkerCommand::Stop).await.unwrap();

    // No notice or error before completion
    assert_eq!(f.next_event().await, WorkerEvent::Completed);
    assert_eq!(f.browser.playback_frames(), 0);
    assert_eq!(f.downloads.count(), 1);
}

#[tokio::test]
async fn test_mixing_converts_tab_format() {
    let mut f = spawn_worker();

    // A 16kHz tab is resampled into the 8kHz recording
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tab.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..16000 {
        writer.write_sample((i % 100) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let file = AudioFile::open(&path).unwrap();
    let tab = f
        .browser
        .open_tab_with_audio("https://example.com", TabAudio::File(Arc::new(file)));
    let handle = f.browser.capture_handle(&tab).await.unwrap();

    f.start(handle, true).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(f.browser.live_tracks(), 2);

    f.commands.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(f.next_event().await, WorkerEvent::Completed);

    let saved = f.downloads.saved();
    let audio = AudioFile::from_bytes(&saved[0].1.bytes).unwrap();
    assert_eq!(audio.sample_rate, 8000);
    assert_eq!(audio.channels, 1);
    assert!(!audio.samples.is_empty());
    eventually(|| f.browser.live_tracks() == 0).await;
}

#[tokio::test]
async fn test_closing_context_discards_recording() {
    let f = spawn_worker();
    let handle = f.handle_for("https://example.com").await;

    f.start(handle, false).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let Fixture {
        browser,
        downloads,
        commands,
        mut events,
        task,
        ..
    } = f;
    drop(commands);
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

    assert_eq!(browser.live_tracks(), 0);
    assert_eq!(downloads.count(), 0);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_host_reopens_after_close() {
    let browser = test_browser();
    let downloads = Arc::new(MemorySink::default());
    let encoders = Arc::new(TestEncoderFactory::default());
    let (mut host, mut events) =
        WorkerHost::new(worker_deps(&browser, encoders, downloads.clone()));

    assert!(host.send(WorkerCommand::Stop).await.is_err());

    host.ensure_open();
    assert!(host.is_open());
    host.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(events.recv().await, Some(WorkerEvent::Completed));

    host.close().await;
    assert!(!host.is_open());

    host.ensure_open();
    host.send(WorkerCommand::Stop).await.unwrap();
    assert_eq!(events.recv().await, Some(WorkerEvent::Completed));
    host.close().await;
}

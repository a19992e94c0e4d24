use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::audio::{EncoderFactory, WavEncoderFactory};
use crate::config::Config;
use crate::panel::{ControlPanel, PermissionSettings};
use crate::platform::SimulatedBrowser;
use crate::preferences::{JsonPreferenceStore, PreferenceStore};
use crate::protocol::LifecycleEvent;
use crate::session::{CoordinatorHandle, SessionCoordinator};
use crate::worker::{DirectorySink, DownloadSink, WorkerDeps, WorkerHost};

/// A fully wired recorder running on the simulated browser
pub struct App {
    pub browser: SimulatedBrowser,
    pub preferences: Arc<dyn PreferenceStore>,
    pub coordinator: CoordinatorHandle,
    coordinator_task: JoinHandle<()>,
}

impl App {
    /// Build from configuration with JSON-file preferences
    pub async fn build(config: &Config) -> Result<Self> {
        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(JsonPreferenceStore::new(&config.preferences.path));
        Self::with_preferences(config, preferences).await
    }

    pub async fn with_preferences(
        config: &Config,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self> {
        let browser = SimulatedBrowser::new(
            config.recording.stream_format(),
            config.recording.frame_duration_ms,
        );
        let encoders: Arc<dyn EncoderFactory> = Arc::new(WavEncoderFactory);
        let sink = DirectorySink::new(config.recording.output_dir());
        info!("Recordings will be saved in {}", sink.dir().display());
        let downloads: Arc<dyn DownloadSink> = Arc::new(sink);

        let deps = WorkerDeps {
            devices: Arc::new(browser.clone()),
            output: Arc::new(browser.clone()),
            encoders,
            downloads,
            settings: config.recording.worker_settings(),
        };
        let (worker, worker_events) = WorkerHost::new(deps);

        let coordinator =
            SessionCoordinator::new(Arc::new(browser.clone()), worker, preferences.clone());
        let (coordinator, coordinator_task) = coordinator.spawn(worker_events);

        // Every process start resyncs persisted state
        coordinator
            .lifecycle(LifecycleEvent::Startup)
            .await
            .context("Session coordinator failed to start")?;

        info!("{} ready", config.service.name);

        Ok(Self {
            browser,
            preferences,
            coordinator,
            coordinator_task,
        })
    }

    pub async fn panel(&self) -> ControlPanel {
        ControlPanel::open(self.coordinator.clone(), self.preferences.clone()).await
    }

    pub fn settings(&self) -> PermissionSettings {
        PermissionSettings::new(Arc::new(self.browser.clone()), self.preferences.clone())
    }

    /// Drop the coordinator handle and wait for the actor to release the worker
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            coordinator,
            coordinator_task,
            ..
        } = self;
        drop(coordinator);
        coordinator_task
            .await
            .context("Session coordinator task panicked")
    }
}

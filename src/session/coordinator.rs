use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{Session, SessionSnapshot, SessionStatus};
use crate::error::RecorderError;
use crate::platform::CaptureProvider;
use crate::preferences::{PreferenceStore, PreferenceUpdate};
use crate::protocol::{
    ContextId, ControlResponse, LifecycleEvent, PanelRequest, StateChanged, TeardownReason,
    WorkerCommand, WorkerEvent,
};
use crate::worker::WorkerHost;

const MAILBOX_SIZE: usize = 32;
const BROADCAST_CAPACITY: usize = 64;

const READY_TEXT: &str = "Ready to record.";
const STARTING_TEXT: &str = "Starting recording...";
const STARTED_TEXT: &str = "Recording started...";
const STOPPING_TEXT: &str = "Stopping recording...";
const SAVED_TEXT: &str = "Recording saved! Ready for new recording.";

/// Messages accepted by the coordinator actor
#[derive(Debug)]
pub enum CoordinatorMessage {
    Panel {
        request: PanelRequest,
        reply: oneshot::Sender<Result<(), RecorderError>>,
    },
    Lifecycle(LifecycleEvent),
    Status(oneshot::Sender<SessionSnapshot>),
}

/// Owner of the single recording session
///
/// Runs as one actor task: panel requests, lifecycle signals and worker
/// events are handled strictly one at a time, so the session has exactly one
/// writer. Every state change is persisted and broadcast as `STATE_CHANGED`.
pub struct SessionCoordinator {
    capture: Arc<dyn CaptureProvider>,
    worker: WorkerHost,
    preferences: Arc<dyn PreferenceStore>,
    session: Option<Session>,
    status_text: String,
    state_tx: broadcast::Sender<StateChanged>,
}

impl SessionCoordinator {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        worker: WorkerHost,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            capture,
            worker,
            preferences,
            session: None,
            status_text: READY_TEXT.to_string(),
            state_tx,
        }
    }

    /// Start the actor, consuming worker events from `worker_events`
    pub fn spawn(
        self,
        worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let handle = CoordinatorHandle {
            tx,
            state_tx: self.state_tx.clone(),
        };

        let task = tokio::spawn(self.run(rx, worker_events));
        (handle, task)
    }

    async fn run(
        mut self,
        mut messages: mpsc::Receiver<CoordinatorMessage>,
        mut worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        info!("Session coordinator started");

        // Pending worker events are always handled before the next request
        loop {
            tokio::select! {
                biased;
                Some(event) = worker_events.recv() => self.on_worker_event(event).await,
                message = messages.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
            }
        }

        self.worker.close().await;
        info!("Session coordinator stopped");
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Panel { request, reply } => {
                let result = match request {
                    PanelRequest::StartRecording {
                        target_context_id,
                        include_microphone,
                    } => self.request_start(target_context_id, include_microphone).await,
                    PanelRequest::StopRecording => self.request_stop().await,
                };
                let _ = reply.send(result);
            }
            CoordinatorMessage::Lifecycle(event) => self.on_lifecycle_event(event).await,
            CoordinatorMessage::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.session.as_ref(), &self.status_text)
    }

    fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map_or(SessionStatus::Idle, |session| session.status)
    }

    fn broadcast(&mut self, status_text: impl Into<String>) {
        self.status_text = status_text.into();
        let message = StateChanged::new(self.status(), self.status_text.clone());
        debug!("State changed: {:?} \"{}\"", message.status, message.status_text);

        // No subscribers is not an error; panels come and go
        let _ = self.state_tx.send(message);
    }

    fn set_status(&mut self, status: SessionStatus) {
        if let Some(session) = self.session.as_mut() {
            session.status = status;
        }
    }

    async fn persist_recording(&self, is_recording: bool) {
        if let Err(e) = self
            .preferences
            .merge(PreferenceUpdate::recording(is_recording))
            .await
        {
            error!("Failed to persist isRecording={}: {:#}", is_recording, e);
        }
    }

    pub async fn request_start(
        &mut self,
        target_context_id: ContextId,
        include_microphone: bool,
    ) -> Result<(), RecorderError> {
        if let Some(session) = &self.session {
            warn!(
                "Start rejected, recording {} is {:?}",
                session.recording_id, session.status
            );
            return Err(RecorderError::AlreadyActive);
        }

        let session = Session::new(target_context_id.clone(), include_microphone);
        info!(
            "Starting recording {} for {} (microphone: {})",
            session.recording_id, target_context_id, include_microphone
        );
        self.session = Some(session);
        self.broadcast(STARTING_TEXT);

        if let Err(e) = self.begin(&target_context_id, include_microphone).await {
            self.abort_start(&e).await;
            return Err(e);
        }

        self.set_status(SessionStatus::Active);
        self.persist_recording(true).await;
        self.broadcast(STARTED_TEXT);
        Ok(())
    }

    async fn begin(
        &mut self,
        target_context_id: &ContextId,
        include_microphone: bool,
    ) -> Result<(), RecorderError> {
        self.worker.ensure_open();

        let capture_handle = self
            .capture
            .capture_handle(target_context_id)
            .await
            .map_err(|e| RecorderError::CaptureUnavailable(format!("{:#}", e)))?;

        self.worker
            .send(WorkerCommand::Start {
                capture_handle,
                include_microphone,
            })
            .await
    }

    async fn abort_start(&mut self, cause: &RecorderError) {
        error!("Error starting tab capture: {}", cause);
        self.session = None;
        self.persist_recording(false).await;
        self.broadcast(format!("Error: {}", cause));
        self.worker.close().await;
    }

    pub async fn request_stop(&mut self) -> Result<(), RecorderError> {
        let Some(session) = self.session.as_ref() else {
            return Err(RecorderError::NotActive);
        };
        if session.status != SessionStatus::Active {
            debug!("Stop rejected while {:?}", session.status);
            return Err(RecorderError::NotActive);
        }

        info!("Stopping recording {}", session.recording_id);
        self.set_status(SessionStatus::Stopping);

        if let Err(e) = self.worker.send(WorkerCommand::Stop).await {
            error!("Failed to reach media worker: {}", e);
            self.reset(format!("Recording Error: {}", e)).await;
            return Err(e);
        }

        self.broadcast(STOPPING_TEXT);
        Ok(())
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed => self.on_worker_completed().await,
            WorkerEvent::Error { reason } => self.on_worker_error(reason).await,
            WorkerEvent::Notice { reason } => self.on_worker_notice(reason),
        }
    }

    pub async fn on_worker_completed(&mut self) {
        if self.session.is_none() {
            debug!("Late completion after reset, closing worker context");
            self.worker.close().await;
            return;
        }

        info!("Recording complete and file saved. Closing worker context.");
        self.reset(SAVED_TEXT).await;
    }

    pub async fn on_worker_error(&mut self, reason: String) {
        if self.session.is_none() {
            warn!("Late worker error after reset: {}", reason);
            self.worker.close().await;
            return;
        }

        error!("Error from media worker: {}", reason);
        self.reset(format!("Recording Error: {}", reason)).await;
    }

    pub fn on_worker_notice(&mut self, reason: String) {
        if self.session.is_none() {
            debug!("Dropping worker notice with no session: {}", reason);
            return;
        }

        warn!("Media worker notice: {}", reason);
        self.broadcast(reason);
    }

    /// Return to Idle, releasing the worker context
    async fn reset(&mut self, status_text: impl Into<String>) {
        self.session = None;
        self.worker.close().await;
        self.persist_recording(false).await;
        self.broadcast(status_text);
    }

    /// Forced teardown from any status
    ///
    /// An Active (or Starting) worker still gets a stop command so the
    /// recording is finalized and saved before its context closes; the
    /// resulting completion arrives as a late event.
    pub async fn on_external_teardown(&mut self, reason: TeardownReason) {
        match self.session.take() {
            Some(session) => {
                info!(
                    "Tearing down recording {} ({:?})",
                    session.recording_id, reason
                );
                if matches!(
                    session.status,
                    SessionStatus::Active | SessionStatus::Starting
                ) {
                    if let Err(e) = self.worker.send(WorkerCommand::Stop).await {
                        warn!("Could not stop media worker: {}", e);
                    }
                }
                self.worker.close().await;
            }
            None => debug!("Teardown ({:?}) with no active session", reason),
        }

        self.persist_recording(false).await;
        self.broadcast(reason.status_text());
    }

    pub async fn on_lifecycle_event(&mut self, event: LifecycleEvent) {
        let recorded = self
            .session
            .as_ref()
            .map(|session| session.target_context_id.clone());

        match event {
            LifecycleEvent::ContextClosed { context_id } => {
                if recorded.as_ref() == Some(&context_id) {
                    info!("Recording tab closed. Stopping recording.");
                    self.on_external_teardown(TeardownReason::ContextClosed).await;
                }
            }
            LifecycleEvent::ContextNavigated { context_id, url } => {
                if recorded.as_ref() == Some(&context_id) {
                    info!("Recording tab navigated to {}. Stopping recording.", url);
                    self.on_external_teardown(TeardownReason::ContextNavigated)
                        .await;
                }
            }
            LifecycleEvent::Startup => {
                self.warn_if_interrupted().await;
                self.on_external_teardown(TeardownReason::Startup).await;
            }
            LifecycleEvent::Installed => {
                self.warn_if_interrupted().await;
                self.on_external_teardown(TeardownReason::Installed).await;
            }
        }
    }

    async fn warn_if_interrupted(&self) {
        match self.preferences.load().await {
            Ok(prefs) if prefs.is_recording => {
                warn!("Previous recording was interrupted, resetting state");
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read preferences: {:#}", e),
        }
    }
}

/// Cloneable client for the coordinator actor
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorMessage>,
    state_tx: broadcast::Sender<StateChanged>,
}

impl CoordinatorHandle {
    pub async fn start_recording(
        &self,
        target_context_id: ContextId,
        include_microphone: bool,
    ) -> Result<(), RecorderError> {
        self.request(PanelRequest::StartRecording {
            target_context_id,
            include_microphone,
        })
        .await
    }

    pub async fn stop_recording(&self) -> Result<(), RecorderError> {
        self.request(PanelRequest::StopRecording).await
    }

    pub async fn request(&self, request: PanelRequest) -> Result<(), RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorMessage::Panel { request, reply })
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| RecorderError::CoordinatorUnavailable)?
    }

    /// Wire-level entry point: a panel request in, an acknowledgment out
    pub async fn send(&self, request: PanelRequest) -> ControlResponse {
        ControlResponse::from(&self.request(request).await)
    }

    pub async fn lifecycle(&self, event: LifecycleEvent) -> Result<(), RecorderError> {
        self.tx
            .send(CoordinatorMessage::Lifecycle(event))
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)
    }

    pub async fn status(&self) -> Result<SessionSnapshot, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoordinatorMessage::Status(reply))
            .await
            .map_err(|_| RecorderError::CoordinatorUnavailable)?;
        rx.await.map_err(|_| RecorderError::CoordinatorUnavailable)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.state_tx.subscribe()
    }
}

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::media_worker::{MediaWorker, WorkerDeps};
use crate::error::RecorderError;
use crate::protocol::{WorkerCommand, WorkerEvent};

/// How long `close` waits for the worker to wind down before aborting it
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerContext {
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

/// Owns the lifecycle of the media worker context
///
/// The worker is spawned on demand and torn down by dropping its command
/// channel. Events from every context generation arrive on the single
/// receiver returned by `new`.
pub struct WorkerHost {
    deps: WorkerDeps,
    events: mpsc::UnboundedSender<WorkerEvent>,
    context: Option<WorkerContext>,
}

impl WorkerHost {
    pub fn new(deps: WorkerDeps) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                deps,
                events,
                context: None,
            },
            events_rx,
        )
    }

    pub fn is_open(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| !ctx.task.is_finished())
    }

    /// Spawn the worker context unless one is already running
    pub fn ensure_open(&mut self) {
        if self.is_open() {
            return;
        }

        info!("Creating media worker context");
        let (commands, task) = MediaWorker::spawn(self.deps.clone(), self.events.clone());
        self.context = Some(WorkerContext { commands, task });
    }

    pub async fn send(&self, command: WorkerCommand) -> Result<(), RecorderError> {
        let ctx = self
            .context
            .as_ref()
            .ok_or_else(|| RecorderError::WorkerUnavailable("worker context is closed".into()))?;

        ctx.commands
            .send(command)
            .await
            .map_err(|_| RecorderError::WorkerUnavailable("worker context exited".into()))
    }

    /// Close the worker context, releasing anything it still holds
    ///
    /// Commands already queued are still processed before the worker exits.
    pub async fn close(&mut self) {
        let Some(WorkerContext { commands, mut task }) = self.context.take() else {
            return;
        };

        drop(commands);
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(_) => debug!("Media worker context closed"),
            Err(_) => {
                warn!("Media worker did not exit within {:?}, aborting", CLOSE_TIMEOUT);
                task.abort();
            }
        }
    }
}

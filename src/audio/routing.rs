// Routing nodes connect streams to each other inside the media worker.
//
// Each node is a spawned task forwarding frames between channels. A node must
// be disconnected explicitly (or dropped) when the session ends; disconnecting
// aborts the task and drops every channel end it owns.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioOutput, DeviceError, PlaybackSink, StreamFormat};

/// Channel capacity between routing stages
pub const ROUTE_BUFFER_FRAMES: usize = 100;

/// A running audio-graph node
pub struct RoutingNode {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl RoutingNode {
    pub(crate) fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            task: Some(tokio::spawn(future)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Disconnecting {} node", self.name);
            task.abort();
        }
    }
}

impl Drop for RoutingNode {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Route tab audio to local playback while passing it on to the recorder
///
/// Capturing a tab mutes it for the user; the monitor restores audible
/// playback. Returns the node and the pass-through receiver, or the original
/// receiver untouched if playback could not be opened.
pub fn monitor(
    mut input: mpsc::Receiver<AudioFrame>,
    format: StreamFormat,
    output: &dyn AudioOutput,
) -> Result<(RoutingNode, mpsc::Receiver<AudioFrame>), (DeviceError, mpsc::Receiver<AudioFrame>)> {
    let mut sink: Box<dyn PlaybackSink> = match output.open_playback(format) {
        Ok(sink) => sink,
        Err(e) => return Err((e, input)),
    };

    let (tx, rx) = mpsc::channel(ROUTE_BUFFER_FRAMES);

    let node = RoutingNode::spawn("monitor", async move {
        let mut playback_ok = true;

        while let Some(frame) = input.recv().await {
            if playback_ok {
                if let Err(e) = sink.write(&frame) {
                    warn!("Tab audio playback failed, monitor muted: {}", e);
                    playback_ok = false;
                }
            }

            if tx.send(frame).await.is_err() {
                break;
            }
        }

        debug!("Monitor route finished");
    });

    info!("Tab audio playback restored");

    Ok((node, rx))
}

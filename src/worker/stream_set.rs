use tracing::debug;

use crate::audio::{MediaStream, RoutingNode};

/// Everything a recording holds open inside the worker
///
/// Owned exclusively by the worker task. `release` stops every track and
/// disconnects every node; it is safe to call any number of times.
#[derive(Default)]
pub struct StreamSet {
    pub tab_audio: Option<MediaStream>,
    pub mic_audio: Option<MediaStream>,
    pub monitor: Option<RoutingNode>,
    pub mixer: Option<RoutingNode>,
}

impl StreamSet {
    pub fn is_released(&self) -> bool {
        self.tab_audio.is_none()
            && self.mic_audio.is_none()
            && self.monitor.is_none()
            && self.mixer.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut node) = self.mixer.take() {
            node.disconnect();
        }
        if let Some(mut node) = self.monitor.take() {
            node.disconnect();
        }
        if let Some(mut stream) = self.tab_audio.take() {
            stream.stop_tracks();
        }
        if let Some(mut stream) = self.mic_audio.take() {
            stream.stop_tracks();
        }
        debug!("Stream set released");
    }
}

impl Drop for StreamSet {
    fn drop(&mut self) {
        self.release();
    }
}

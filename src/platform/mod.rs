//! Host platform capabilities
//!
//! Tab capture is the one primitive only the coordinator uses; media devices
//! and playback output live in `audio::backend` with the worker.

mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::{CaptureHandle, ContextId};

pub use simulated::{MicrophoneState, SimulatedBrowser, TabAudio};

/// A tab as the control panel sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetContext {
    pub id: ContextId,
    pub url: String,
}

impl TargetContext {
    /// Browser-internal pages cannot be captured
    pub fn is_capturable(&self) -> bool {
        !self.url.starts_with("chrome://")
    }
}

/// Tab-capture capability provider
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Issue a single-use handle that lets the media worker open the tab's audio
    async fn capture_handle(&self, target: &ContextId) -> Result<CaptureHandle>;
}

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, error, warn};

use crate::platform::TargetContext;
use crate::preferences::{PreferenceStore, PreferenceUpdate};
use crate::protocol::{ControlResponse, PanelRequest, StateChanged};
use crate::session::{CoordinatorHandle, SessionStatus};

const READY_TEXT: &str = "Ready to record.";
const RECORDING_TEXT: &str = "Recording...";
pub const PERMISSION_REQUIRED_TEXT: &str =
    "Microphone permission required. Please enable microphone access.";
const NO_TAB_TEXT: &str = "No active tab found.";
const CHROME_PAGE_TEXT: &str = "Cannot record chrome:// pages.";
const STOP_ACCEPTED_TEXT: &str = "Recording stopped. Preparing download...";

/// Microphone indicator next to the checkbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneStatus {
    Hidden,
    Granted,
    SetupNeeded,
}

impl MicrophoneStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Hidden => "",
            Self::Granted => "[OK] Granted",
            Self::SetupNeeded => "⚠ Setup needed",
        }
    }
}

/// Everything the panel displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelView {
    pub status_text: String,
    pub start_visible: bool,
    pub stop_visible: bool,
    /// Starting or Stopping: both buttons hidden
    pub busy: bool,
    pub microphone_checked: bool,
    pub microphone_enabled: bool,
    pub microphone_status: MicrophoneStatus,
}

/// Follow-up the host should perform after a panel interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    None,
    OpenSettings,
}

/// Presentation over the coordinator's broadcasts and persisted preferences
///
/// The panel never touches media APIs. Its microphone precondition is the
/// persisted grant, not a live permission query.
pub struct ControlPanel {
    coordinator: CoordinatorHandle,
    preferences: Arc<dyn PreferenceStore>,
    updates: broadcast::Receiver<StateChanged>,
    status: SessionStatus,
    status_text: String,
    include_microphone: bool,
    permission_granted: bool,
}

impl ControlPanel {
    pub async fn open(
        coordinator: CoordinatorHandle,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let updates = coordinator.subscribe();

        let mut panel = Self {
            coordinator,
            preferences,
            updates,
            status: SessionStatus::Idle,
            status_text: READY_TEXT.to_string(),
            include_microphone: false,
            permission_granted: false,
        };

        match panel.preferences.load().await {
            Ok(prefs) => {
                panel.include_microphone = prefs.include_microphone;
                panel.permission_granted = prefs.microphone_permission_granted;
                if prefs.is_recording {
                    panel.status = SessionStatus::Active;
                    panel.status_text = RECORDING_TEXT.to_string();
                }
            }
            Err(e) => {
                error!("Error updating panel from storage: {:#}", e);
                panel.status_text = "Error loading state.".to_string();
            }
        }

        panel
    }

    pub fn is_recording(&self) -> bool {
        self.status.is_recording()
    }

    pub fn view(&self) -> PanelView {
        let busy = self.status.is_busy();
        let recording = self.is_recording();

        let microphone_status = match (self.include_microphone, self.permission_granted) {
            (false, _) => MicrophoneStatus::Hidden,
            (true, true) => MicrophoneStatus::Granted,
            (true, false) => MicrophoneStatus::SetupNeeded,
        };

        PanelView {
            status_text: self.status_text.clone(),
            start_visible: !recording && !busy,
            stop_visible: recording && !busy,
            busy,
            microphone_checked: self.include_microphone,
            microphone_enabled: !recording && !busy,
            microphone_status,
        }
    }

    /// Re-read the persisted grant; the settings surface may have changed it
    pub async fn refresh_permission(&mut self) -> bool {
        let granted = match self.preferences.load().await {
            Ok(prefs) => prefs.microphone_permission_granted,
            Err(e) => {
                warn!("Could not check microphone permission status: {:#}", e);
                false
            }
        };
        if granted != self.permission_granted {
            self.on_permission_changed(granted);
        }
        self.permission_granted
    }

    async fn persist_microphone(&self, include_microphone: bool) {
        if let Err(e) = self
            .preferences
            .merge(PreferenceUpdate::microphone(include_microphone))
            .await
        {
            error!("Failed to save microphone preference: {:#}", e);
        }
    }

    /// Start recording `target`; returns the coordinator's response if a
    /// request was sent
    pub async fn click_start(&mut self, target: Option<TargetContext>) -> Option<ControlResponse> {
        self.sync();
        if self.is_recording() || self.status.is_busy() {
            return None;
        }

        let include_microphone = self.include_microphone;
        if include_microphone && !self.refresh_permission().await {
            self.status_text = PERMISSION_REQUIRED_TEXT.to_string();
            return None;
        }

        self.persist_microphone(include_microphone).await;

        let target = match target {
            Some(target) => target,
            None => {
                self.status_text = NO_TAB_TEXT.to_string();
                return None;
            }
        };
        if !target.is_capturable() {
            self.status_text = CHROME_PAGE_TEXT.to_string();
            return None;
        }

        let response = self
            .coordinator
            .send(PanelRequest::StartRecording {
                target_context_id: target.id,
                include_microphone,
            })
            .await;

        self.sync();
        if !response.success {
            self.status_text = response
                .error
                .clone()
                .unwrap_or_else(|| "Failed to start recording.".to_string());
        }

        Some(response)
    }

    pub async fn click_stop(&mut self) -> Option<ControlResponse> {
        self.sync();
        if !self.is_recording() {
            return None;
        }

        let response = self.coordinator.send(PanelRequest::StopRecording).await;

        self.sync();
        if !response.success {
            self.status_text = response
                .error
                .clone()
                .unwrap_or_else(|| "Failed to stop.".to_string());
        } else if self.status == SessionStatus::Stopping {
            // The worker may already have finished; its broadcast wins
            self.status_text = STOP_ACCEPTED_TEXT.to_string();
        }

        Some(response)
    }

    /// The microphone checkbox changed
    ///
    /// Checking it without a stored grant unchecks it again and asks the host
    /// to open the settings surface.
    pub async fn toggle_microphone(&mut self, checked: bool) -> PanelAction {
        if !checked {
            self.include_microphone = false;
            self.persist_microphone(false).await;
            self.status_text = READY_TEXT.to_string();
            return PanelAction::None;
        }

        if self.refresh_permission().await {
            self.include_microphone = true;
            self.persist_microphone(true).await;
            self.status_text = "Ready to record with microphone.".to_string();
            PanelAction::None
        } else {
            self.include_microphone = false;
            self.persist_microphone(false).await;
            self.status_text =
                "Grant microphone permission in the settings tab, then try again.".to_string();
            PanelAction::OpenSettings
        }
    }

    pub fn on_state_changed(&mut self, message: &StateChanged) {
        debug!("Panel update: {:?} \"{}\"", message.status, message.status_text);
        self.status = message.status;
        if !message.status_text.is_empty() {
            self.status_text = message.status_text.clone();
        }
    }

    /// Mirror a change of the persisted microphone grant
    fn on_permission_changed(&mut self, granted: bool) {
        self.permission_granted = granted;
        if granted && self.include_microphone {
            self.status_text = "Microphone permission granted! Ready to record.".to_string();
        }
    }

    /// Apply every broadcast received so far; returns how many were applied
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.updates.try_recv() {
                Ok(message) => {
                    self.on_state_changed(&message);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Panel missed {} state updates", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return applied,
            }
        }
    }

    /// Wait for the next broadcast and apply it; `None` once the coordinator is gone
    pub async fn next_update(&mut self) -> Option<StateChanged> {
        loop {
            match self.updates.recv().await {
                Ok(message) => {
                    self.on_state_changed(&message);
                    return Some(message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Panel missed {} state updates", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

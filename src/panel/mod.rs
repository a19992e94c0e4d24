mod control_panel;
mod settings;

pub use control_panel::{
    ControlPanel, MicrophoneStatus, PanelAction, PanelView, PERMISSION_REQUIRED_TEXT,
};
pub use settings::{PermissionOutcome, PermissionSettings, ProbeOutcome, SOUND_THRESHOLD};

pub mod app;
pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod panel;
pub mod platform;
pub mod preferences;
pub mod protocol;
pub mod session;
pub mod worker;

pub use app::App;
pub use audio::{AudioFile, AudioFrame, AudioStreamSource, StreamFormat};
pub use config::Config;
pub use error::RecorderError;
pub use http::{create_router, AppState};
pub use panel::{ControlPanel, PanelAction, PanelView, PermissionSettings};
pub use platform::{CaptureProvider, SimulatedBrowser, TargetContext};
pub use preferences::{JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, Preferences};
pub use protocol::{
    CaptureHandle, ContextId, ControlResponse, LifecycleEvent, PanelRequest, StateChanged,
    WorkerCommand, WorkerEvent,
};
pub use session::{CoordinatorHandle, SessionCoordinator, SessionSnapshot, SessionStatus};
pub use worker::{Artifact, DirectorySink, DownloadSink, WorkerDeps, WorkerHost, WorkerSettings};

//! Cross-context message protocol
//!
//! The coordinator, media worker and control panel share no memory; every
//! interaction is one of these messages. All types serialize to tagged JSON
//! (`{"type": "START_RECORDING", ...}`) so they can cross process boundaries.

pub mod messages;

pub use messages::{
    CaptureHandle, ContextId, ControlResponse, LifecycleEvent, PanelRequest, StateChanged,
    TeardownReason, WorkerCommand, WorkerEvent,
};

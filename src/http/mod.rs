//! HTTP API server for external control
//!
//! This module exposes the control panel's operations over REST:
//! - POST /recording/start - Start recording a tab
//! - POST /recording/stop - Stop the active recording
//! - GET /recording/status - Query session status
//! - GET /recording/events - Server-sent STATE_CHANGED stream
//! - POST /contexts, POST /contexts/:id/navigate, DELETE /contexts/:id - Drive simulated tabs
//! - POST /settings/microphone - Request microphone permission
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

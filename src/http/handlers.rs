use super::state::AppState;
use crate::error::RecorderError;
use crate::panel::{PermissionOutcome, PERMISSION_REQUIRED_TEXT};
use crate::platform::{TabAudio, TargetContext};
use crate::protocol::{ContextId, ControlResponse, LifecycleEvent};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Tab to capture
    pub target_context_id: ContextId,

    /// Mix microphone input into the recording
    #[serde(default)]
    pub include_microphone: bool,
}

#[derive(Debug, Deserialize)]
pub struct OpenContextRequest {
    pub url: String,

    /// Tone frequency the tab plays (default: 440 Hz)
    pub tone_hz: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(error: &RecorderError) -> StatusCode {
    match error {
        RecorderError::AlreadyActive | RecorderError::NotActive => StatusCode::CONFLICT,
        RecorderError::CaptureUnavailable(_) | RecorderError::AcquisitionFailure { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RecorderError::EncodingFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RecorderError::WorkerUnavailable(_) | RecorderError::CoordinatorUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn control_response(result: Result<(), RecorderError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(ControlResponse::accepted())).into_response(),
        Err(e) => (status_for(&e), Json(ControlResponse::rejected(e.to_string()))).into_response(),
    }
}

fn not_found(context_id: &ContextId) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Tab {} not found", context_id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
///
/// Like the panel, refuses the microphone unless a grant is on record.
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    info!(
        "Starting recording for tab {} (microphone: {})",
        req.target_context_id, req.include_microphone
    );

    if req.include_microphone && !state.settings.microphone_granted().await {
        warn!("Start rejected: microphone permission not granted");
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ControlResponse::rejected(PERMISSION_REQUIRED_TEXT)),
        )
            .into_response();
    }

    let result = state
        .coordinator
        .start_recording(req.target_context_id, req.include_microphone)
        .await;
    match &result {
        Err(e) if e.is_rejection() => warn!("Start rejected: {}", e),
        Err(e) => error!("Failed to start recording: {}", e),
        Ok(()) => {}
    }

    control_response(result)
}

/// POST /recording/stop
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping recording");
    control_response(state.coordinator.stop_recording().await)
}

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.status().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => {
            error!("Failed to get status: {}", e);
            (
                status_for(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /recording/events
/// Server-sent stream of STATE_CHANGED broadcasts
pub async fn state_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let updates = state.coordinator.subscribe();

    let stream = futures::stream::unfold(updates, |mut updates| async move {
        loop {
            match updates.recv().await {
                Ok(message) => {
                    let event = Event::default().event("STATE_CHANGED").json_data(&message);
                    return Some((event, updates));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /contexts
/// Open a simulated tab
pub async fn open_context(
    State(state): State<AppState>,
    Json(req): Json<OpenContextRequest>,
) -> impl IntoResponse {
    let audio = match req.tone_hz {
        Some(frequency_hz) => TabAudio::Tone {
            frequency_hz,
            amplitude: 4000,
        },
        None => TabAudio::default(),
    };

    let id = state.browser.open_tab_with_audio(req.url.clone(), audio);
    (StatusCode::CREATED, Json(TargetContext { id, url: req.url }))
}

/// POST /contexts/:context_id/navigate
pub async fn navigate_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
    Json(req): Json<NavigateRequest>,
) -> impl IntoResponse {
    let context_id = ContextId::new(context_id);
    if state.browser.navigate(&context_id, req.url.clone()).is_err() {
        return not_found(&context_id);
    }

    let event = LifecycleEvent::ContextNavigated {
        context_id: context_id.clone(),
        url: req.url.clone(),
    };
    if let Err(e) = state.coordinator.lifecycle(event).await {
        error!("Failed to deliver navigation event: {}", e);
    }

    (
        StatusCode::OK,
        Json(TargetContext {
            id: context_id,
            url: req.url,
        }),
    )
        .into_response()
}

/// DELETE /contexts/:context_id
pub async fn close_context(
    State(state): State<AppState>,
    Path(context_id): Path<String>,
) -> impl IntoResponse {
    let context_id = ContextId::new(context_id);
    if state.browser.close_tab(&context_id).is_err() {
        return not_found(&context_id);
    }

    if let Err(e) = state
        .coordinator
        .lifecycle(LifecycleEvent::ContextClosed { context_id })
        .await
    {
        error!("Failed to deliver close event: {}", e);
    }

    StatusCode::NO_CONTENT.into_response()
}

/// POST /settings/microphone
/// Request microphone permission through the settings surface
pub async fn request_microphone(State(state): State<AppState>) -> impl IntoResponse {
    let response = match state.settings.request_microphone().await {
        PermissionOutcome::Granted => PermissionResponse {
            granted: true,
            message: None,
        },
        PermissionOutcome::Denied { message } => PermissionResponse {
            granted: false,
            message: Some(message),
        },
    };

    (StatusCode::OK, Json(response))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// Integration tests for the HTTP control surface
//
// Requests go straight into the router; no socket is bound.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tab_audio_recorder::{create_router, App, AppState, Config, MemoryPreferenceStore};
use tower::ServiceExt;

struct Server {
    app: App,
    router: Router,
    output: tempfile::TempDir,
}

async fn server() -> Server {
    let output = tempfile::tempdir().unwrap();

    let mut cfg = Config::default();
    cfg.recording.output_dir = output.path().display().to_string();
    cfg.recording.sample_rate = 8000;
    cfg.recording.channels = 1;
    cfg.recording.frame_duration_ms = 10;

    let app = App::with_preferences(&cfg, Arc::new(MemoryPreferenceStore::default()))
        .await
        .unwrap();
    let state = AppState::new(app.coordinator.clone(), app.browser.clone(), app.settings());

    Server {
        router: create_router(state),
        app,
        output,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn saved_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_health() {
    let s = server().await;

    let response = s
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_starts_idle() {
    let s = server().await;

    let (status, body) = send(&s.router, "GET", "/recording/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["is_recording"], false);
    assert_eq!(body["status_text"], "Ready to record.");

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_unknown_tab_is_unprocessable() {
    let s = server().await;

    let (status, body) = send(
        &s.router,
        "POST",
        "/recording/start",
        Some(json!({"target_context_id": "tab-404"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No tab with id tab-404");

    let (_, body) = send(&s.router, "GET", "/recording/status", None).await;
    assert_eq!(body["status"], "idle");

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_record_over_http() {
    let s = server().await;
    let output = s.output.path().to_path_buf();

    let (status, tab) = send(
        &s.router,
        "POST",
        "/contexts",
        Some(json!({"url": "https://example.com", "tone_hz": 330.0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tab["url"], "https://example.com");
    let tab_id = tab["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &s.router,
        "POST",
        "/recording/start",
        Some(json!({"target_context_id": tab_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, body) = send(
        &s.router,
        "POST",
        "/recording/start",
        Some(json!({"target_context_id": tab_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Already recording.");

    let (_, snapshot) = send(&s.router, "GET", "/recording/status", None).await;
    assert_eq!(snapshot["status"], "active");
    assert_eq!(snapshot["target_context_id"], tab_id.as_str());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, _) = send(&s.router, "POST", "/recording/stop", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&s.router, "POST", "/recording/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Not recording.");

    tokio::time::timeout(Duration::from_secs(5), async {
        while saved_files(&output) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recording was not saved");

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closing_unknown_context_is_not_found() {
    let s = server().await;

    let (status, body) = send(&s.router, "DELETE", "/contexts/tab-77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Tab tab-77 not found");

    let (status, _) = send(
        &s.router,
        "POST",
        "/contexts/tab-77/navigate",
        Some(json!({"url": "https://example.org"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closing_recorded_context_stops_recording() {
    let s = server().await;
    let output = s.output.path().to_path_buf();

    let (_, tab) = send(
        &s.router,
        "POST",
        "/contexts",
        Some(json!({"url": "https://example.com"})),
    )
    .await;
    let tab_id = tab["id"].as_str().unwrap().to_string();
    send(
        &s.router,
        "POST",
        "/recording/start",
        Some(json!({"target_context_id": tab_id})),
    )
    .await;

    let (status, _) = send(&s.router, "DELETE", &format!("/contexts/{}", tab_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, snapshot) = send(&s.router, "GET", "/recording/status", None).await;
    assert_eq!(snapshot["status"], "idle");
    assert_eq!(snapshot["status_text"], "Tab closed. Recording stopped.");

    tokio::time::timeout(Duration::from_secs(5), async {
        while saved_files(&output) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recording was not saved");

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_with_microphone_requires_grant() {
    let s = server().await;

    let (_, tab) = send(
        &s.router,
        "POST",
        "/contexts",
        Some(json!({"url": "https://example.com"})),
    )
    .await;
    let tab_id = tab["id"].as_str().unwrap().to_string();
    let start = json!({"target_context_id": tab_id, "include_microphone": true});

    let (status, body) = send(&s.router, "POST", "/recording/start", Some(start.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["error"],
        "Microphone permission required. Please enable microphone access."
    );
    let (_, snapshot) = send(&s.router, "GET", "/recording/status", None).await;
    assert_eq!(snapshot["status"], "idle");

    let (status, _) = send(&s.router, "POST", "/settings/microphone", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&s.router, "POST", "/recording/start", Some(start)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    let (_, snapshot) = send(&s.router, "GET", "/recording/status", None).await;
    assert_eq!(snapshot["include_microphone"], true);

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_grant_microphone() {
    let s = server().await;

    let (status, body) = send(&s.router, "POST", "/settings/microphone", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"granted": true}));
    assert!(
        s.app
            .preferences
            .load()
            .await
            .unwrap()
            .microphone_permission_granted
    );

    drop(s.router);
    s.app.shutdown().await.unwrap();
}

// tests/status_http.rs
//
// Status router exercised in-process via tower::ServiceExt::oneshot.

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value as Json;
use tower::ServiceExt as _;

use trend_digest::config::RunMode;
use trend_digest::pipeline::TickOutcome;
use trend_digest::status::{router, SchedulerState, StatusBoard};

const BODY_LIMIT: usize = 1024 * 1024;

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let app = router(StatusBoard::new(RunMode::Daily), None);
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn status_reports_mode_state_and_last_tick() {
    let board = StatusBoard::new(RunMode::Daily);
    let (_, body) = get(router(board.clone(), None), "/status").await;
    let v: Json = serde_json::from_str(&body).expect("json");
    assert_eq!(v["mode"], "daily");
    assert_eq!(v["state"], "idle");
    assert_eq!(v["ticks"], 0);
    assert!(v["last_tick"].is_null());

    let date = NaiveDate::from_ymd_opt(2025, 8, 16).unwrap();
    board.record_tick(TickOutcome::Empty {
        date,
        failed_sources: 2,
        total_sources: 2,
    });
    board.set_state(SchedulerState::Stopped);

    let (status, body) = get(router(board, None), "/status").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).expect("json");
    assert_eq!(v["state"], "stopped");
    assert_eq!(v["ticks"], 1);
    assert_eq!(v["last_tick"]["outcome"], "empty");
    assert_eq!(v["last_tick"]["date"], "2025-08-16");
    assert_eq!(v["last_tick"]["failed_sources"], 2);
}

#[tokio::test]
async fn metrics_unavailable_without_recorder() {
    let app = router(StatusBoard::new(RunMode::Once), None);
    let (status, _) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_rendered_from_handle() {
    // Local recorder: no global install, so tests stay independent.
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("digest_ticks_total", "outcome" => "completed").increment(1);
    });

    let app = router(StatusBoard::new(RunMode::Daily), Some(handle));
    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("digest_ticks_total"), "{body}");
}

// src/status.rs
//! Scheduler status board and the small HTTP surface exposing it.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Local, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::config::RunMode;
use crate::pipeline::TickOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting,
    Triggering,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub mode: RunMode,
    pub state: SchedulerState,
    pub next_run: Option<DateTime<Local>>,
    pub ticks: u64,
    pub last_tick: Option<TickRecord>,
}

/// Shared, cheaply clonable view of what the scheduler is doing.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new(mode: RunMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusSnapshot {
                mode,
                state: SchedulerState::Idle,
                next_run: None,
                ticks: 0,
                last_tick: None,
            })),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut g = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut g);
    }

    pub fn set_state(&self, state: SchedulerState) {
        self.update(|s| s.state = state);
    }

    pub fn set_waiting(&self, next_run: DateTime<Local>) {
        self.update(|s| {
            s.state = SchedulerState::Waiting;
            s.next_run = Some(next_run);
        });
    }

    pub fn record_tick(&self, outcome: TickOutcome) {
        self.update(|s| {
            s.ticks += 1;
            s.state = SchedulerState::Idle;
            s.last_tick = Some(TickRecord {
                finished_at: Utc::now(),
                outcome,
            });
        });
    }
}

#[derive(Clone)]
struct AppState {
    board: StatusBoard,
    prometheus: Option<PrometheusHandle>,
}

pub fn router(board: StatusBoard, prometheus: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(AppState { board, prometheus })
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.board.snapshot())
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.prometheus {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Serve the status router until the task is dropped.
pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "status", %addr, "status server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

//! HTTP endpoints
//!
//! One-shot jobs at `POST /api/run`, live sessions at `GET /ws`, plus health
//! and session listing.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use snipbox::job::{Action, Job, JobRequest};
use snipbox::report::{Report, Section};
use snipbox::runner::{JobContext, JobError, Runner, report_status};
use snipbox::session::{SessionInfo, SessionRegistry};
use snipbox::{Config, SessionConfig};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::ws;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub runner: Runner,
    pub registry: SessionRegistry,
    pub session: Arc<SessionConfig>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let session = Arc::new(config.session.clone());
        Self {
            runner: Runner::new(config),
            registry: SessionRegistry::new(),
            session,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/run", post(run_job))
        .route("/api/sessions", get(list_sessions))
        .route("/ws", get(ws::upgrade))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list().await)
}

#[derive(Debug, Serialize)]
struct RunResponse {
    report: Report,
    text: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<Report>,
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// POST /api/run - run one job and wait for its report
async fn run_job(State(state): State<AppState>, Json(request): Json<JobRequest>) -> Response {
    let job = match Job::from_request(request) {
        Ok(job) => job,
        Err(rejection) => return error_response(JobError::from(rejection)),
    };
    debug!(job = %job.id(), action = %job.action(), "one-shot job received");

    match state.runner.run_job(&job, JobContext::default()).await {
        Ok(report) => report_response(job.action(), report),
        Err(error) => error_response(error),
    }
}

fn report_response(action: Action, report: Report) -> Response {
    let code = status(report_status(&report));

    if action == Action::Assembly {
        if let [Section::Assembly { text }] = report.sections.as_slice() {
            return (
                code,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                text.clone(),
            )
                .into_response();
        }
    }

    let text = report.to_text();
    (code, Json(RunResponse { report, text })).into_response()
}

fn error_response(error: JobError) -> Response {
    let code = status(error.status_code());
    if code.is_server_error() {
        warn!(kind = error.kind(), error = %error, "job failed on the server side");
    }

    let kind = error.kind();
    let message = error.client_message();
    let report = match error {
        JobError::CompileFailed { report } | JobError::ToolFailed { report, .. } => Some(report),
        _ => None,
    };

    let body = ErrorResponse {
        kind,
        message,
        timestamp: Utc::now(),
        report,
    };
    (code, Json(body)).into_response()
}

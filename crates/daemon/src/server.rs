//! JSON HTTP API over the organizer's query/trigger surface.
//!
//! The dashboard views and the IP allowlist live in front of this router.

use crate::daemon::{Organizer, OrganizerError};
use crate::job_executor::SubmitError;
use crate::status::Trigger;
use crate::transcode::TranscodeError;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Lines returned per log poll when the client does not ask for a limit
const DEFAULT_LOG_LIMIT: usize = 500;

const DEFAULT_PER_PAGE: u32 = 50;

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

type AppState = Arc<Organizer>;

/// Organizer errors mapped onto HTTP statuses
struct ApiError(OrganizerError);

impl From<OrganizerError> for ApiError {
    fn from(e: OrganizerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrganizerError::Busy(_) => StatusCode::CONFLICT,
            OrganizerError::Submit(SubmitError::AlreadyRunning(_)) => StatusCode::CONFLICT,
            OrganizerError::Submit(SubmitError::Transcode(TranscodeError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    offset: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TranscodeRequest {
    path: PathBuf,
}

fn trigger_response(trigger: Trigger) -> Response {
    let status = match trigger {
        Trigger::Accepted => StatusCode::ACCEPTED,
        Trigger::Busy => StatusCode::CONFLICT,
    };
    (status, Json(json!({"status": trigger}))).into_response()
}

async fn get_status(State(org): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(org.status().await?).into_response())
}

async fn get_missing(
    State(org): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let page = org
        .missing(q.page.unwrap_or(1), q.per_page.unwrap_or(DEFAULT_PER_PAGE))
        .await?;
    let total_pages = page.total_pages();
    Ok(Json(json!({
        "items": page.items,
        "page": page.page,
        "per_page": page.per_page,
        "total": page.total,
        "total_pages": total_pages,
    }))
    .into_response())
}

async fn get_logs(State(org): State<AppState>, Query(q): Query<LogQuery>) -> Response {
    Json(org.log_tail(q.offset.unwrap_or(0), q.limit.unwrap_or(DEFAULT_LOG_LIMIT))).into_response()
}

async fn get_transcode_logs(State(org): State<AppState>, Query(q): Query<LogQuery>) -> Response {
    Json(org.transcode_log_tail(q.offset.unwrap_or(0), q.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
        .into_response()
}

async fn post_scan(State(org): State<AppState>) -> Response {
    trigger_response(org.trigger_scan())
}

async fn post_cleanup(State(org): State<AppState>) -> Response {
    trigger_response(org.trigger_cleanup())
}

async fn post_orphans(State(org): State<AppState>) -> Result<Response, ApiError> {
    let orphans = org.detect_orphans().await?;
    Ok(Json(json!({"count": orphans.len(), "orphans": orphans})).into_response())
}

async fn post_transcode(
    State(org): State<AppState>,
    Json(req): Json<TranscodeRequest>,
) -> Result<Response, ApiError> {
    let submitted = org.trigger_transcode(req.path).await?;
    Ok((StatusCode::ACCEPTED, Json(submitted)).into_response())
}

/// Creates the axum Router with all API routes
pub fn create_router(organizer: Arc<Organizer>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/missing", get(get_missing))
        .route("/api/logs", get(get_logs))
        .route("/api/scan", post(post_scan))
        .route("/api/cleanup", post(post_cleanup))
        .route("/api/orphans", post(post_orphans))
        .route("/api/transcode", post(post_transcode))
        .route("/api/transcode/logs", get(get_transcode_logs))
        .with_state(organizer)
}

/// Serve the API on `bind` until the listener fails
pub async fn run_server(organizer: Arc<Organizer>, bind: &str) -> Result<(), ServerError> {
    let app = create_router(organizer);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

//! HTTP control plane
//!
//! A thin resource layer over the engine: create classification jobs,
//! read their progress, and remove finished ones. The engine itself
//! stays protocol-agnostic; this module owns the JSON shapes.

use crate::engine::ClassificationEngine;
use crate::error::Result;
use crate::job::{ClassificationJob, JobKind};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Body of a job creation request. Exactly one of the fields names the
/// work to queue.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub tag_url: Option<String>,
    pub user_id: Option<String>,
}

/// A job rendered as a resource.
#[derive(Debug, Serialize)]
pub struct JobResource {
    pub id: String,
    pub job_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub state: crate::job::JobState,
    pub state_message: &'static str,
    pub progress: f32,
    pub duration: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<crate::job::JobErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobResource {
    pub fn from_job(job: &ClassificationJob) -> Self {
        let (tag_url, user_id, job_type) = match job.kind() {
            JobKind::Tag { tag_url } => (Some(tag_url.clone()), None, "tag"),
            JobKind::User { user_id } => (None, Some(user_id.clone()), "user"),
        };
        let state = job.state();
        let error = job.error();

        Self {
            id: job.id().to_string(),
            job_type,
            tag_url,
            user_id,
            state,
            state_message: state.message(),
            progress: job.progress(),
            duration: job.duration(),
            error_type: error.as_ref().map(|(kind, _)| *kind),
            error_message: error.map(|(_, message)| message),
        }
    }
}

#[derive(Debug, Serialize)]
struct EngineStatus {
    running: bool,
    suspended: bool,
    jobs_in_system: usize,
    waiting_jobs: usize,
    stats: crate::stats::PerformanceStats,
}

/// Build the control plane router.
pub fn router(engine: Arc<ClassificationEngine>) -> Router {
    Router::new()
        .route("/classifier/jobs", post(create_job))
        .route("/classifier/jobs/:id", get(show_job).delete(delete_job))
        .route("/classifier/status", get(show_status))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve the control plane until the process is told to shut down.
pub async fn serve(engine: Arc<ClassificationEngine>, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(crate::error::SiftError::Io)?;
    info!(host, port, "control plane listening");
    axum::serve(listener, router(engine))
        .await
        .map_err(crate::error::SiftError::Io)?;
    Ok(())
}

async fn create_job(
    State(engine): State<Arc<ClassificationEngine>>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    let job = match (request.tag_url, request.user_id) {
        (Some(tag_url), _) => engine.add_tag_job(tag_url),
        (None, Some(user_id)) => engine.add_user_job(user_id),
        (None, None) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({
                    "error": "either tag_url or user_id is required"
                })),
            )
                .into_response();
        }
    };

    (
        StatusCode::CREATED,
        [(
            header::LOCATION,
            format!("/classifier/jobs/{}", job.id()),
        )],
        Json(JobResource::from_job(&job)),
    )
        .into_response()
}

async fn show_job(
    State(engine): State<Arc<ClassificationEngine>>,
    Path(id): Path<String>,
) -> Response {
    match engine.fetch_job(&id) {
        Some(job) => Json(JobResource::from_job(&job)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_job(
    State(engine): State<Arc<ClassificationEngine>>,
    Path(id): Path<String>,
) -> Response {
    match engine.fetch_job(&id) {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(job) if !job.state().is_terminal() => StatusCode::CONFLICT.into_response(),
        Some(_) => {
            engine.remove_job(&id);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn show_status(State(engine): State<Arc<ClassificationEngine>>) -> Response {
    Json(EngineStatus {
        running: engine.is_running(),
        suspended: engine.is_suspended(),
        jobs_in_system: engine.num_jobs_in_system(),
        waiting_jobs: engine.num_waiting_jobs(),
        stats: engine.performance_stats(),
    })
    .into_response()
}

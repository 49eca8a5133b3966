//! HTTP front-end: `spec.md` §6's REST surface over the Job Queue.
//!
//! Routes never touch the Orchestrator directly — every request becomes a
//! [`JobRequest`], is enqueued, and is bounded by a per-operation timeout so
//! a wedged device can't hang an HTTP worker forever.

use crate::jobs::{JobRequest, JobResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use device_pool::Pool;
use job_queue::{Queue, QueueError};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    queue: Queue<JobRequest, JobResponse>,
    pool: Arc<Pool>,
    in_flight: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(queue: Queue<JobRequest, JobResponse>, pool: Arc<Pool>) -> Self {
        AppState {
            queue,
            pool,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/get-identity", get(get_identity))
        .route("/api/get-cw", post(get_cw))
        .route("/api/get-rw", post(get_rw))
        .route("/api/authenticate", post(authenticate))
        .route("/api/full-auth", get(full_auth))
        .route("/api/health", get(health))
        .with_state(state)
}

#[derive(Debug, serde::Serialize)]
struct StatusBody {
    status: &'static str,
    message: &'static str,
}

/// `GET /api/status`: liveness probe only — never touches the device or
/// cloud, so it bypasses the queue entirely.
async fn status() -> Response {
    Json(StatusBody {
        status: "ok",
        message: "gateway-mediator is running",
    })
    .into_response()
}

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(180);
const CW_TIMEOUT: Duration = Duration::from_secs(180);
const RW_TIMEOUT: Duration = Duration::from_secs(180);
const AUTH_TIMEOUT: Duration = Duration::from_secs(240);
const FULL_AUTH_TIMEOUT: Duration = Duration::from_secs(240);

/// Run one job through the queue, bounded by `timeout`. A client-input
/// error never reaches here (routes validate before enqueueing); every
/// error this function can produce is an internal one, per `spec.md` §7's
/// "client errors are 400, everything else is 500" split.
async fn run_job(state: &AppState, timeout: Duration, req: JobRequest) -> Result<JobResponse, ApiError> {
    state.in_flight.fetch_add(1, Ordering::SeqCst);
    let result = tokio::time::timeout(timeout, state.queue.enqueue_and_wait(req)).await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    match result {
        Ok(Ok(resp)) => Ok(resp),
        Ok(Err(QueueError::Closed)) => Err(ApiError::Internal("job queue is not running".into())),
        Ok(Err(QueueError::ResultLost)) => {
            Err(ApiError::Internal("worker dropped this job's result".into()))
        }
        Err(_) => Err(ApiError::Internal("operation timed out".into())),
    }
}

async fn get_identity(State(state): State<AppState>) -> Response {
    respond(run_job(&state, IDENTITY_TIMEOUT, JobRequest::GetIdentity).await)
}

#[derive(Debug, Deserialize)]
struct GetCwBody {
    identity: String,
}

async fn get_cw(State(state): State<AppState>, Json(body): Json<GetCwBody>) -> Response {
    if body.identity.trim().is_empty() {
        return ApiError::BadRequest("identity must not be empty".into()).into_response();
    }
    respond(run_job(&state, CW_TIMEOUT, JobRequest::GetCw { identity: body.identity }).await)
}

#[derive(Debug, Deserialize)]
struct GetRwBody {
    cw: String,
}

async fn get_rw(State(state): State<AppState>, Json(body): Json<GetRwBody>) -> Response {
    if body.cw.trim().is_empty() {
        return ApiError::BadRequest("cw must not be empty".into()).into_response();
    }
    respond(run_job(&state, RW_TIMEOUT, JobRequest::GetRw { cw: body.cw }).await)
}

#[derive(Debug, Deserialize)]
struct AuthenticateBody {
    identity: String,
    cw: String,
    rw: String,
    #[serde(rename = "transactionId")]
    transaction_id: String,
}

async fn authenticate(State(state): State<AppState>, Json(body): Json<AuthenticateBody>) -> Response {
    if [&body.identity, &body.cw, &body.rw, &body.transaction_id]
        .iter()
        .any(|s| s.trim().is_empty())
    {
        return ApiError::BadRequest("identity, cw, rw and transactionId are all required".into())
            .into_response();
    }
    respond(
        run_job(
            &state,
            AUTH_TIMEOUT,
            JobRequest::Authenticate {
                identity: body.identity,
                cw: body.cw,
                rw: body.rw,
                transaction_id: body.transaction_id,
            },
        )
        .await,
    )
}

async fn full_auth(State(state): State<AppState>) -> Response {
    respond(run_job(&state, FULL_AUTH_TIMEOUT, JobRequest::FullAuth).await)
}

#[derive(Debug, serde::Serialize)]
struct HealthBody {
    status: &'static str,
    queue_size: usize,
    devices: Vec<DeviceHealthBody>,
}

#[derive(Debug, serde::Serialize)]
struct DeviceHealthBody {
    id: String,
    consecutive_failures: u32,
    total_ops: u64,
    successful_ops: u64,
}

async fn health(State(state): State<AppState>) -> Response {
    let devices = state
        .pool
        .health_snapshot()
        .into_iter()
        .map(|(id, h)| DeviceHealthBody {
            id,
            consecutive_failures: h.consecutive_failures,
            total_ops: h.total_ops,
            successful_ops: h.successful_ops,
        })
        .collect();
    Json(HealthBody {
        status: if state.pool.is_empty() { "no-devices" } else { "ok" },
        queue_size: state.in_flight.load(Ordering::SeqCst),
        devices,
    })
    .into_response()
}

fn respond(result: Result<JobResponse, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (
            status,
            Json(JobResponse {
                success: false,
                error: Some(message),
                ..Default::default()
            }),
        )
            .into_response()
    }
}

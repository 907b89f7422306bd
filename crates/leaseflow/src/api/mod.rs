use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::model::{JobStatusView, JobType, ReservationOutcome};
use crate::jobs::scheduler::Scheduler;
use crate::jobs::stats::{render_prometheus, QueueStats};

pub mod models;

use models::{
    CreateJobRequest, ErrorBody, FailRequest, HeartbeatQuery, JobResponse, OkResponse,
    ReserveQuery, StatsQuery,
};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Scheduler,
    /// Used when a reserve or heartbeat call does not name a duration.
    pub default_lease: Duration,
    /// Caps the `wait` a caller may ask for on reserve.
    pub max_wait_ceiling: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Producers
        .route("/jobs", post(create_job))
        // Workers
        .route("/jobs/reserve", post(reserve_job))
        .route("/jobs/:id/heartbeat", post(heartbeat))
        .route("/jobs/:id/complete", post(complete_job))
        .route("/jobs/:id/fail", post(fail_job))
        // Inspect / admin
        .route("/jobs/:id", get(get_status).delete(delete_job))
        .route("/stats", get(stats))
        .route("/metrics/prom", get(metrics_prom))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueueError::Validation { .. } => StatusCode::BAD_REQUEST,
            QueueError::NotFound { .. } => StatusCode::NOT_FOUND,
            QueueError::Conflict { .. } => StatusCode::CONFLICT,
            QueueError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub async fn create_job(
    State(state): State<ApiState>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let job = state.scheduler.create_job(body.into_new_job()?).await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

pub async fn reserve_job(
    State(state): State<ApiState>,
    Query(q): Query<ReserveQuery>,
) -> ApiResult<Response> {
    let job_type: JobType = q.job_type.parse()?;
    let lease = q
        .lease
        .map(Duration::from_secs)
        .unwrap_or(state.default_lease);
    let wait = Duration::from_secs(q.wait.unwrap_or(0)).min(state.max_wait_ceiling);

    // a client that hangs up drops this future, which ends the wait
    let outcome = state.scheduler.reserve_next(job_type, lease, wait).await?;

    Ok(match outcome {
        ReservationOutcome::Claimed(job) => {
            (StatusCode::OK, Json(JobResponse::from(job))).into_response()
        }
        ReservationOutcome::NoneEligible => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(q): Query<HeartbeatQuery>,
) -> ApiResult<Json<OkResponse>> {
    let extend = q
        .extend
        .map(Duration::from_secs)
        .unwrap_or(state.default_lease);
    let ok = state.scheduler.heartbeat(id, extend).await?;
    Ok(Json(OkResponse { ok }))
}

pub async fn complete_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OkResponse>> {
    let ok = state.scheduler.complete(id).await?;
    Ok(Json(OkResponse { ok }))
}

pub async fn fail_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FailRequest>,
) -> ApiResult<Json<OkResponse>> {
    let ok = state.scheduler.fail(id, &body.error).await?;
    Ok(Json(OkResponse { ok }))
}

pub async fn get_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.scheduler.get_status(id).await?))
}

pub async fn delete_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(state): State<ApiState>,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Json<QueueStats>> {
    let job_type: JobType = q.job_type.parse()?;
    Ok(Json(state.scheduler.stats(job_type).await?))
}

pub async fn metrics_prom(State(state): State<ApiState>) -> ApiResult<Response> {
    let all = state.scheduler.stats_all().await?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        render_prometheus(&all),
    )
        .into_response())
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

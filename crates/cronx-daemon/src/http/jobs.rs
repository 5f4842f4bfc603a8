//! Scheduler control endpoints.
//!
//! Job and template CRUD lives outside the daemon; whoever edits a job row
//! calls `POST /scheduler/jobs/{id}/sync` so the live schedule follows.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use cronx_core::JobId;
use cronx_scheduler::{JobStore, SchedulerError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// GET /scheduler/jobs: jobs with a live timer, soonest first.
pub async fn list_active(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "jobs": state.scheduler.list_active() }))
}

/// POST /scheduler/jobs/{id}/run: execute once now, outside the schedule.
pub async fn run_now(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    if state.scheduler.state().is_stopping() {
        return Err(error_response(&SchedulerError::ShuttingDown));
    }
    let id = JobId::from(id);
    let job = state
        .store
        .get_job(&id)
        .await
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| error_response(&SchedulerError::JobNotFound { id: id.to_string() }))?;

    info!(job_id = %id, "manual run requested");
    let result = state.scheduler.execute_job(&job).await;
    Ok(Json(json!({ "ok": result.success, "result": result })))
}

/// POST /scheduler/jobs/{id}/sync: re-read the job row and reschedule,
/// or unschedule it if it was deleted or disabled.
pub async fn sync(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let id = JobId::from(id);
    let job = state.store.get_job(&id).await.map_err(|e| error_response(&e))?;

    let scheduled = match job {
        Some(job) => {
            let enabled = job.is_enabled;
            state
                .scheduler
                .update_job(job)
                .await
                .map_err(|e| error_response(&e))?;
            enabled
        }
        None => {
            state.scheduler.unschedule_job(&id).await;
            false
        }
    };

    let next_execution = state
        .scheduler
        .list_active()
        .into_iter()
        .find(|a| a.job_id == id)
        .and_then(|a| a.next_execution);
    Ok(Json(json!({
        "ok": true,
        "scheduled": scheduled,
        "next_execution": next_execution,
    })))
}

/// DELETE /scheduler/jobs/{id}: stop the job's timer. Unknown ids succeed.
pub async fn unschedule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<Value> {
    state.scheduler.unschedule_job(&JobId::from(id)).await;
    Json(json!({ "ok": true }))
}

fn error_response(err: &SchedulerError) -> (StatusCode, Json<Value>) {
    let status = status_for(err);
    if status.is_server_error() {
        warn!(error = %err, "scheduler request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn status_for(err: &SchedulerError) -> StatusCode {
    match err {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        SchedulerError::JobNotFound { .. } | SchedulerError::TemplateNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_http_status() {
        assert_eq!(
            status_for(&SchedulerError::InvalidTimezone("Nowhere".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SchedulerError::JobNotFound { id: "x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SchedulerError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SchedulerError::Database(rusqlite::Error::InvalidQuery)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

use axum::{
    routing::{delete, get, post},
    Router,
};
use cronx_scheduler::{SchedulerService, SqliteStore};
use std::sync::Arc;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub scheduler: Arc<SchedulerService>,
    /// Same database the scheduler writes to; handlers read job rows from it.
    pub store: SqliteStore,
}

impl AppState {
    pub fn new(scheduler: Arc<SchedulerService>, store: SqliteStore) -> Self {
        Self {
            scheduler,
            store,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/scheduler/jobs", get(crate::http::jobs::list_active))
        .route("/scheduler/jobs/{id}", delete(crate::http::jobs::unschedule))
        .route("/scheduler/jobs/{id}/run", post(crate::http::jobs::run_now))
        .route("/scheduler/jobs/{id}/sync", post(crate::http::jobs::sync))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use cronx_core::config::SchedulerConfig;
    use cronx_scheduler::HttpExecutor;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let config = SchedulerConfig::default();
        let store = SqliteStore::open_in_memory().unwrap();
        let scheduler = SchedulerService::new(
            Arc::new(store.clone()),
            HttpExecutor::new(&config),
            &config,
        );
        Arc::new(AppState::new(scheduler, store))
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let res = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_scheduler_state() {
        let (status, body) = call(build_router(state()), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler"], "initializing");
        assert_eq!(body["active_jobs"], 0);
    }

    #[tokio::test]
    async fn active_jobs_start_empty() {
        let (status, body) = call(build_router(state()), "GET", "/scheduler/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn run_unknown_job_is_not_found() {
        let (status, body) =
            call(build_router(state()), "POST", "/scheduler/jobs/nope/run").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn unschedule_unknown_job_is_ok() {
        let (status, body) = call(build_router(state()), "DELETE", "/scheduler/jobs/nope").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }
}

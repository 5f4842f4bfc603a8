use std::sync::Arc;

use chrono::{DateTime, Utc};
use cronx_core::JobId;
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::JobStore;
use crate::types::{ExecutionLogEntry, ExecutionResult};

/// Appends the audit row for each logical execution.
///
/// Only the resolved outcome is written (`retry_attempt = 0`); the number of
/// HTTP attempts behind it is visible in the tracing output only.
pub struct ExecutionLogWriter {
    store: Arc<dyn JobStore>,
}

impl ExecutionLogWriter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Build the immutable row for `result`.
    pub fn entry(
        job_id: &JobId,
        started_at: DateTime<Utc>,
        result: &ExecutionResult,
    ) -> ExecutionLogEntry {
        ExecutionLogEntry {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.clone(),
            executed_at: started_at,
            status: result.status(),
            response_status: result.status_code,
            response_body: result.body.clone(),
            response_headers: result.headers.clone(),
            duration_ms: result.duration_ms,
            error_message: result.error.clone(),
            retry_attempt: 0,
            created_at: Utc::now(),
        }
    }

    /// Best effort: a failed write is logged and reported as `false`,
    /// never propagated.
    pub async fn append(
        &self,
        job_id: &JobId,
        started_at: DateTime<Utc>,
        result: &ExecutionResult,
    ) -> bool {
        let entry = Self::entry(job_id, started_at, result);
        match self.store.append_execution_log(&entry).await {
            Ok(()) => {
                debug!(job_id = %job_id, log_id = %entry.id, status = %entry.status, "execution logged");
                true
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to append execution log");
                false
            }
        }
    }
}

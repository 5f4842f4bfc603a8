use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronx_core::{JobId, TemplateId};

use crate::error::Result;
use crate::types::{ExecutionLogEntry, Job, Template};

/// The persistence operations the engine needs. Any backend works as long as
/// `increment_job_stats` is atomic: concurrent executions of the same job
/// must never lose an increment.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Live (non-deleted) template, or `None`.
    async fn get_template(&self, id: &TemplateId) -> Result<Option<Template>>;

    /// Live (non-deleted) job, or `None`.
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Add one execution and one success or failure; set `last_execution`.
    async fn increment_job_stats(
        &self,
        id: &JobId,
        success: bool,
        executed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// `None` clears the value (job unscheduled).
    async fn set_next_execution(&self, id: &JobId, next: Option<DateTime<Utc>>) -> Result<()>;

    async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()>;

    /// Enabled, non-deleted jobs; used at startup.
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>>;
}

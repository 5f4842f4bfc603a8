use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Only the schedule-time variants (`InvalidExpression`, `InvalidTimezone`,
/// `InvalidJob`, `ShuttingDown`) ever reach API callers. Execution failures are
/// carried as data in [`crate::types::ExecutionResult`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cron expression cannot be parsed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The timezone is not a known IANA name.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A job field is outside its allowed range.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Template not found: {id}")]
    TemplateNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The service is shutting down and accepts no new schedules.
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl SchedulerError {
    pub(crate) fn invalid_expression(expression: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the caller's input (400-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidExpression { .. }
                | SchedulerError::InvalidTimezone(_)
                | SchedulerError::InvalidJob(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

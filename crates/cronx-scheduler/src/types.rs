use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use cronx_core::config::DEFAULT_TIMEZONE;
use cronx_core::{JobId, TemplateId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

pub const MAX_RETRY_ATTEMPTS: u32 = 10;
pub const MIN_TIMEOUT_SECS: u32 = 1;
pub const MAX_TIMEOUT_SECS: u32 = 300;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;

/// A scheduled unit of work: one template fired on one cron schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    /// Standard 5-field cron expression.
    pub cron_expression: String,
    /// IANA timezone the expression is evaluated in.
    pub timezone: String,
    pub template_id: TemplateId,
    pub is_enabled: bool,
    /// Additional attempts after the first failed one (0–10).
    pub retry_attempts: u32,
    /// Per-attempt timeout cap in seconds (1–300).
    pub timeout_seconds: u32,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// New enabled job in UTC with default retry and timeout settings.
    pub fn new(name: &str, cron_expression: &str, template_id: TemplateId) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.to_string(),
            description: None,
            cron_expression: cron_expression.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            template_id,
            is_enabled: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            last_execution: None,
            next_execution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the range-limited fields. The cron expression is checked separately
    /// by [`crate::cron::CronSchedule::parse`].
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("name must not be empty".into()));
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(SchedulerError::InvalidJob(format!(
                "retry_attempts must be between 0 and {MAX_RETRY_ATTEMPTS}, got {}",
                self.retry_attempts
            )));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_seconds) {
            return Err(SchedulerError::InvalidJob(format!(
                "timeout_seconds must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {}",
                self.timeout_seconds
            )));
        }
        Ok(())
    }
}

/// HTTP verbs a template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// GET and HEAD requests never carry the template body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("unknown http method: {other}")),
        }
    }
}

/// Where an API key is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Authentication applied to every request built from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        location: ApiKeyLocation,
        key: String,
        value: String,
    },
}

/// A reusable HTTP request definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    pub timeout_seconds: u32,
    pub follow_redirects: bool,
    pub validate_ssl: bool,
    /// Status codes counted as success. Empty means `[200]`.
    #[serde(default)]
    pub expected_status_codes: Vec<u16>,
    /// Stored with the template; not evaluated by the engine.
    pub response_validation: Option<serde_json::Value>,
}

impl Template {
    pub fn new(name: &str, method: HttpMethod, url: &str) -> Self {
        Self {
            id: TemplateId::new(),
            name: name.to_string(),
            method,
            url: url.to_string(),
            headers: BTreeMap::new(),
            body: None,
            auth: AuthConfig::None,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            follow_redirects: true,
            validate_ssl: true,
            expected_status_codes: vec![200],
            response_validation: None,
        }
    }

    pub fn is_expected_status(&self, status: u16) -> bool {
        if self.expected_status_codes.is_empty() {
            status == 200
        } else {
            self.expected_status_codes.contains(&status)
        }
    }
}

/// Final outcome class recorded in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            "timeout" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// What one logical execution (all retries included) produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The final attempt failed because the request timed out.
    #[serde(default)]
    pub timed_out: bool,
    /// Requests sent, the first one included.
    pub attempts: u32,
}

impl ExecutionResult {
    /// A failure that never reached the network.
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            status_code: None,
            status_text: None,
            body: None,
            headers: None,
            duration_ms,
            error: Some(error.into()),
            timed_out: false,
            attempts: 0,
        }
    }

    /// Synthetic result returned while the service is shutting down.
    pub fn shutting_down() -> Self {
        Self::failure("service shutting down", 0)
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.success {
            ExecutionStatus::Success
        } else if self.timed_out {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failure
        }
    }
}

/// An immutable audit row: one per logical job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: String,
    pub job_id: JobId,
    /// When the execution started.
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    /// Always 0: internal HTTP retries are folded into one row.
    pub retry_attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// Snapshot row returned by `list_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub name: String,
    pub is_scheduled: bool,
    pub next_execution: Option<DateTime<Utc>>,
}

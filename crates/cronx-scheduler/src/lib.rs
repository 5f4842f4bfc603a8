//! `cronx-scheduler`: cron-driven HTTP job engine with SQLite persistence.
//!
//! # Overview
//!
//! A [`Job`](types::Job) binds a 5-field cron expression and an IANA timezone
//! to a [`Template`](types::Template) describing one HTTP request. The
//! [`SchedulerService`] keeps one live timer per enabled job; when a timer
//! fires the service fetches the template, runs it through the
//! [`HttpExecutor`] (retries with exponential backoff), atomically bumps the
//! job's counters, persists the next fire time and appends an execution log.
//!
//! # Modules
//!
//! | Module       | Role                                               |
//! |--------------|----------------------------------------------------|
//! | `clock`      | Injectable wall-clock source                       |
//! | `cron`       | Expression parsing and timezone-aware next-fire    |
//! | `executor`   | Template → HTTP request, classification, retries   |
//! | `registry`   | Job id → live schedule handle                      |
//! | `service`    | Lifecycle, execution protocol, graceful shutdown   |
//! | `store`      | Persistence trait the engine depends on            |
//! | `db`         | SQLite implementation of the store                 |
//! | `log_writer` | Execution result → audit row                       |

pub mod clock;
pub mod cron;
pub mod db;
pub mod error;
pub mod executor;
pub mod log_writer;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use cron::{next_fire_time, CronSchedule};
pub use db::SqliteStore;
pub use error::{Result, SchedulerError};
pub use executor::HttpExecutor;
pub use log_writer::ExecutionLogWriter;
pub use registry::JobRegistry;
pub use service::{SchedulerService, ServiceState};
pub use store::JobStore;
pub use types::{
    ActiveJob, ApiKeyLocation, AuthConfig, ExecutionLogEntry, ExecutionResult, ExecutionStatus,
    HttpMethod, Job, Template,
};

//! `cronx-core`: configuration, identifiers and the top-level error type
//! shared by every cronx crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::CronxConfig;
pub use error::{CronxError, Result};
pub use types::{JobId, TemplateId};

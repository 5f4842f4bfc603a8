use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronxError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CronxError {
    /// Short error code string, logged next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            CronxError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronxError>;

use std::time::Duration;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;
use uuid::Uuid;

use crate::service::DumpError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid cron expression '{expression}': {reason}")]
    Validation { expression: String, reason: String },
    #[error("unsupported database type: {0}")]
    UnsupportedEngine(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error(transparent)]
    Execution(#[from] DumpError),
    #[error("backup timed out after {0:?}")]
    Timeout(Duration),
    #[error("backup cancelled: orchestrator shutting down")]
    Cancelled,
    #[error("catalog error: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("scheduler already started")]
    AlreadyStarted,
}

impl Error {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Error::NotFound { kind, id }
    }

    pub fn validation(expression: &str, reason: impl Into<String>) -> Self {
        Error::Validation {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

use std::fmt;

use async_trait::async_trait;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    BackupFailed,
    ScheduleInvalid,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::BackupFailed => f.write_str("backup_failed"),
            AlertKind::ScheduleInvalid => f.write_str("schedule_invalid"),
        }
    }
}

/// Notification capability; delivery is up to the implementation.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn create_alert(&self, kind: AlertKind, title: &str, message: &str, database_name: &str);
}

/// Writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn create_alert(&self, kind: AlertKind, title: &str, message: &str, database_name: &str) {
        warn!("[{}] {} ({}): {}", kind, title, database_name, message);
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use sqlx::FromRow;
use uuid::{NoContext, Timestamp};

use crate::error::Error;

pub fn new_id() -> Uuid {
    Uuid::new_v7(Timestamp::now(NoContext))
}

/// Database engines a dump provider exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    MySql,
    PostgreSql,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::PostgreSql => "postgresql",
        }
    }

    /// Extension of the artifact produced for this engine.
    pub fn extension(&self) -> &'static str {
        match self {
            EngineKind::MySql => "sql",
            EngineKind::PostgreSql => "dump",
        }
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(EngineKind::MySql),
            "postgresql" => Ok(EngineKind::PostgreSql),
            other => Err(Error::UnsupportedEngine(other.to_string())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DatabaseDescriptor {
    pub id: Uuid,
    pub name: String,
    /// Engine as stored; validated against [`EngineKind`] at dispatch.
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database_name: String,
    pub backup_count: i64,
    pub last_backup: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatabaseDescriptor {
    pub fn new(
        name: &str,
        engine: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        database_name: &str,
    ) -> DatabaseDescriptor {
        let now = Utc::now();
        DatabaseDescriptor {
            id: new_id(),
            name: name.to_string(),
            engine: engine.to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            database_name: database_name.to_string(),
            backup_count: 0,
            last_backup: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduleDescriptor {
    pub id: Uuid,
    pub database_id: Uuid,
    pub database_name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDescriptor {
    pub fn new(database: &DatabaseDescriptor, cron_expression: &str) -> ScheduleDescriptor {
        let now = Utc::now();
        ScheduleDescriptor {
            id: new_id(),
            database_id: database.id,
            database_name: database.name.clone(),
            cron_expression: cron_expression.to_string(),
            enabled: true,
            next_run: None,
            last_run: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackupRecord {
    pub id: Uuid,
    pub database_id: Uuid,
    pub database_name: String,
    pub schedule_id: Option<Uuid>,
    #[sqlx(rename = "trigger_kind")]
    pub trigger: TriggerKind,
    pub status: BackupStatus,
    pub file_path: Option<String>,
    pub size: Option<String>,
    /// Whole seconds, truncated.
    pub duration: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BackupRecord {
    pub fn start(database: &DatabaseDescriptor, schedule_id: Option<Uuid>) -> BackupRecord {
        let trigger = match schedule_id {
            Some(_) => TriggerKind::Scheduled,
            None => TriggerKind::Manual,
        };
        BackupRecord {
            id: new_id(),
            database_id: database.id,
            database_name: database.name.clone(),
            schedule_id,
            trigger,
            status: BackupStatus::InProgress,
            file_path: None,
            size: None,
            duration: 0,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn succeed(&mut self, file_path: String, size: String, duration: i64) {
        debug_assert_eq!(self.status, BackupStatus::InProgress);
        self.status = BackupStatus::Success;
        self.file_path = Some(file_path);
        self.size = Some(size);
        self.duration = duration;
    }

    pub fn fail(&mut self, error: String, duration: i64) {
        debug_assert_eq!(self.status, BackupStatus::InProgress);
        self.status = BackupStatus::Failed;
        self.file_path = None;
        self.size = None;
        self.error = Some(error);
        self.duration = duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(engine: &str) -> DatabaseDescriptor {
        DatabaseDescriptor::new("shop", engine, "localhost", 3306, "root", "secret", "shop")
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("mysql".parse::<EngineKind>().unwrap(), EngineKind::MySql);
        assert_eq!(
            "postgresql".parse::<EngineKind>().unwrap(),
            EngineKind::PostgreSql
        );

        let err = "oracle".parse::<EngineKind>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported database type: oracle");
    }

    #[test]
    fn test_trigger_kind_follows_schedule() {
        let db = database("mysql");
        assert_eq!(BackupRecord::start(&db, None).trigger, TriggerKind::Manual);
        assert_eq!(
            BackupRecord::start(&db, Some(new_id())).trigger,
            TriggerKind::Scheduled
        );
    }

    #[test]
    fn test_fail_clears_output() {
        let db = database("postgresql");
        let mut record = BackupRecord::start(&db, None);
        assert_eq!(record.status, BackupStatus::InProgress);

        record.fail("pg_dump failed".to_string(), 3);
        assert_eq!(record.status, BackupStatus::Failed);
        assert_eq!(record.file_path, None);
        assert_eq!(record.size, None);
        assert_eq!(record.error.as_deref(), Some("pg_dump failed"));
        assert_eq!(record.duration, 3);
    }

    #[test]
    fn test_password_not_serialized() {
        let db = database("mysql");
        let serialized = toml::to_string(&db).unwrap();
        assert!(!serialized.contains("secret"));
    }
}

//! Persistence for database descriptors, schedules and backup records.
//!
//! The orchestrator only talks to the [`Catalog`] trait; [`SqliteCatalog`]
//! is the bundled implementation.

use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use sqlx::SqlitePool;

use crate::database::{BackupRecord, DatabaseDescriptor, ScheduleDescriptor};
use crate::error::{Error, Result};

/// Default page size for backup listings.
pub const DEFAULT_BACKUP_LIMIT: u32 = 100;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn insert_database(&self, database: &DatabaseDescriptor) -> Result<()>;
    async fn get_database(&self, id: Uuid) -> Result<Option<DatabaseDescriptor>>;
    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>>;
    async fn update_database(&self, database: &DatabaseDescriptor) -> Result<()>;
    async fn delete_database(&self, id: Uuid) -> Result<bool>;
    /// Increments `backup_count` and advances `last_backup` in one statement.
    async fn record_backup_completion(&self, database_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn insert_schedule(&self, schedule: &ScheduleDescriptor) -> Result<()>;
    async fn get_schedule(&self, id: Uuid) -> Result<Option<ScheduleDescriptor>>;
    async fn update_schedule(&self, schedule: &ScheduleDescriptor) -> Result<()>;
    async fn delete_schedule(&self, id: Uuid) -> Result<bool>;
    async fn enabled_schedules(&self) -> Result<Vec<ScheduleDescriptor>>;
    /// Enabled schedules whose next run is unknown or not after `now`.
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDescriptor>>;
    async fn set_next_run(&self, id: Uuid, next_run: DateTime<Utc>) -> Result<()>;
    async fn set_last_run(&self, id: Uuid, last_run: DateTime<Utc>) -> Result<()>;

    async fn insert_backup(&self, record: &BackupRecord) -> Result<()>;
    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>>;
    async fn list_backups(&self, database_id: Option<Uuid>, limit: u32) -> Result<Vec<BackupRecord>>;
}

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS databases (
        id BLOB PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        engine TEXT NOT NULL,
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        username TEXT NOT NULL,
        password TEXT NOT NULL,
        database_name TEXT NOT NULL,
        backup_count INTEGER NOT NULL DEFAULT 0,
        last_backup TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedules (
        id BLOB PRIMARY KEY NOT NULL,
        database_id BLOB NOT NULL,
        database_name TEXT NOT NULL,
        cron_expression TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        next_run TEXT,
        last_run TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_schedules_enabled ON schedules (enabled, next_run)",
    "CREATE TABLE IF NOT EXISTS backups (
        id BLOB PRIMARY KEY NOT NULL,
        database_id BLOB NOT NULL,
        database_name TEXT NOT NULL,
        schedule_id BLOB,
        trigger_kind TEXT NOT NULL,
        status TEXT NOT NULL,
        file_path TEXT,
        size TEXT,
        duration INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_backups_database ON backups (database_id, created_at)",
];

#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> SqliteCatalog {
        SqliteCatalog { pool }
    }

    /// Opens (creating if missing) the catalog at `url` and migrates it.
    pub async fn connect(url: &str, max_connections: u32) -> Result<SqliteCatalog> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let catalog = SqliteCatalog::new(pool);
        catalog.migrate().await?;
        Ok(catalog)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Catalog schema is up to date.");
        Ok(())
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn insert_database(&self, database: &DatabaseDescriptor) -> Result<()> {
        sqlx::query(
            "INSERT INTO databases (id, name, engine, host, port, username, password, database_name, backup_count, last_backup, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(database.id)
        .bind(&database.name)
        .bind(&database.engine)
        .bind(&database.host)
        .bind(database.port)
        .bind(&database.username)
        .bind(&database.password)
        .bind(&database.database_name)
        .bind(database.backup_count)
        .bind(database.last_backup)
        .bind(database.created_at)
        .bind(database.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_database(&self, id: Uuid) -> Result<Option<DatabaseDescriptor>> {
        let database = sqlx::query_as("SELECT * FROM databases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(database)
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let databases = sqlx::query_as("SELECT * FROM databases ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(databases)
    }

    async fn update_database(&self, database: &DatabaseDescriptor) -> Result<()> {
        // Statistics are left alone; they only move through record_backup_completion.
        let result = sqlx::query(
            "UPDATE databases SET name = ?, engine = ?, host = ?, port = ?, username = ?, password = ?, database_name = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&database.name)
        .bind(&database.engine)
        .bind(&database.host)
        .bind(database.port)
        .bind(&database.username)
        .bind(&database.password)
        .bind(&database.database_name)
        .bind(Utc::now())
        .bind(database.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("database", database.id));
        }
        Ok(())
    }

    async fn delete_database(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM databases WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_backup_completion(&self, database_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE databases SET backup_count = backup_count + 1, last_backup = ?, updated_at = ? WHERE id = ?",
        )
        .bind(at)
        .bind(Utc::now())
        .bind(database_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("database", database_id));
        }
        Ok(())
    }

    async fn insert_schedule(&self, schedule: &ScheduleDescriptor) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedules (id, database_id, database_name, cron_expression, enabled, next_run, last_run, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(schedule.id)
        .bind(schedule.database_id)
        .bind(&schedule.database_name)
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<ScheduleDescriptor>> {
        let schedule = sqlx::query_as("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(schedule)
    }

    async fn update_schedule(&self, schedule: &ScheduleDescriptor) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schedules SET database_id = ?, database_name = ?, cron_expression = ?, enabled = ?, next_run = ?, last_run = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(schedule.database_id)
        .bind(&schedule.database_name)
        .bind(&schedule.cron_expression)
        .bind(schedule.enabled)
        .bind(schedule.next_run)
        .bind(schedule.last_run)
        .bind(Utc::now())
        .bind(schedule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("schedule", schedule.id));
        }
        Ok(())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn enabled_schedules(&self) -> Result<Vec<ScheduleDescriptor>> {
        let schedules = sqlx::query_as("SELECT * FROM schedules WHERE enabled = 1 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(schedules)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDescriptor>> {
        let schedules = sqlx::query_as(
            "SELECT * FROM schedules WHERE enabled = 1 AND (next_run IS NULL OR next_run <= ?) ORDER BY created_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(schedules)
    }

    async fn set_next_run(&self, id: Uuid, next_run: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE schedules SET next_run = ? WHERE id = ?")
            .bind(next_run)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_last_run(&self, id: Uuid, last_run: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE schedules SET last_run = ? WHERE id = ?")
            .bind(last_run)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_backup(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, database_id, database_name, schedule_id, trigger_kind, status, file_path, size, duration, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.database_id)
        .bind(&record.database_name)
        .bind(record.schedule_id)
        .bind(record.trigger)
        .bind(record.status)
        .bind(&record.file_path)
        .bind(&record.size)
        .bind(record.duration)
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>> {
        let record = sqlx::query_as("SELECT * FROM backups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_backups(&self, database_id: Option<Uuid>, limit: u32) -> Result<Vec<BackupRecord>> {
        let records = match database_id {
            Some(database_id) => {
                sqlx::query_as("SELECT * FROM backups WHERE database_id = ? ORDER BY created_at DESC LIMIT ?")
                    .bind(database_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM backups ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }
}

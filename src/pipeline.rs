//! Drives a single backup attempt. The pipeline never touches the catalog;
//! persisting the returned record is the caller's job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use sqlx::types::Uuid;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::database::{BackupRecord, DatabaseDescriptor, EngineKind};
use crate::error::{Error, Result};
use crate::service::command::{remove_partial, DumpRunner, ToolLocator};
use crate::service::{DumpError, DumpProvider, MySqlDumpProvider, PgDumpProvider};
use crate::utils::{format_size, get_size, sanitize_file_name};

pub struct ExecutionPipeline {
    providers: HashMap<EngineKind, Arc<dyn DumpProvider>>,
    backup_dir: PathBuf,
    timeout: Duration,
    cancel: CancellationToken,
}

impl ExecutionPipeline {
    pub fn new(backup_dir: PathBuf, timeout: Duration, cancel: CancellationToken) -> ExecutionPipeline {
        ExecutionPipeline {
            providers: HashMap::new(),
            backup_dir,
            timeout,
            cancel,
        }
    }

    /// Pipeline with the mysqldump and pg_dump providers registered.
    pub fn from_config(config: &Config, cancel: CancellationToken) -> ExecutionPipeline {
        let runner = DumpRunner::new(
            ToolLocator::new(config.tool_paths.clone()),
            config.strategy.clone(),
        );

        ExecutionPipeline::new(config.backup_dir.clone(), config.execution_timeout(), cancel)
            .with_provider(EngineKind::MySql, Arc::new(MySqlDumpProvider::new(runner.clone())))
            .with_provider(EngineKind::PostgreSql, Arc::new(PgDumpProvider::new(runner)))
    }

    pub fn with_provider(mut self, kind: EngineKind, provider: Arc<dyn DumpProvider>) -> ExecutionPipeline {
        self.providers.insert(kind, provider);
        self
    }

    /// Unique per record, so concurrent attempts never write the same file.
    pub fn artifact_path(&self, record: &BackupRecord, kind: EngineKind) -> PathBuf {
        let id = record.id.simple().to_string();
        let file_name = format!(
            "{}_{}_{}.{}",
            sanitize_file_name(&record.database_name),
            record.created_at.format("%Y%m%d_%H%M%S"),
            &id[id.len() - 8..],
            kind.extension()
        );
        self.backup_dir.join(file_name)
    }

    /// Runs one backup attempt and returns the finalized record.
    pub async fn execute(&self, database: &DatabaseDescriptor, schedule_id: Option<Uuid>) -> BackupRecord {
        let started = Instant::now();
        let mut record = BackupRecord::start(database, schedule_id);
        info!("Starting {:?} backup {} of {}", record.trigger, record.id, database.name);

        let outcome = self.run(database, &record).await;
        let duration = started.elapsed().as_secs() as i64;

        match outcome {
            Ok((path, size)) => {
                let size = format_size(size);
                info!("Backup {} of {} finished in {}s ({})", record.id, database.name, duration, size);
                record.succeed(path.display().to_string(), size, duration);
            }
            Err(err) => {
                error!("Backup {} of {} failed after {}s: {}", record.id, database.name, duration, err);
                record.fail(err.to_string(), duration);
            }
        }
        record
    }

    async fn run(&self, database: &DatabaseDescriptor, record: &BackupRecord) -> Result<(PathBuf, u64)> {
        let kind: EngineKind = database.engine.parse()?;
        let provider = self
            .providers
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedEngine(kind.to_string()))?;

        fs::create_dir_all(&self.backup_dir).await.map_err(DumpError::from)?;
        let target = self.artifact_path(record, kind);
        debug!("Backup {} target: {}", record.id, target.display());

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            dumped = tokio::time::timeout(self.timeout, provider.dump(database, &target)) => match dumped {
                Ok(Ok(path)) => Ok(path),
                Ok(Err(err)) => Err(Error::from(err)),
                Err(_) => Err(Error::Timeout(self.timeout)),
            },
        };

        let path = match result {
            Ok(path) => path,
            Err(err) => {
                remove_partial(&target).await;
                return Err(err);
            }
        };

        match get_size(&path) {
            Ok(size) => Ok((path, size)),
            Err(err) => {
                remove_partial(&path).await;
                Err(DumpError::from(err).into())
            }
        }
    }
}

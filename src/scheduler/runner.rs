use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::alert::{AlertKind, AlertSink};
use crate::catalog::Catalog;
use crate::database::{BackupRecord, BackupStatus, DatabaseDescriptor, ScheduleDescriptor};
use crate::error::{Error, Result};
use crate::pipeline::ExecutionPipeline;
use crate::scheduler::next_run::NextRunCalculator;

/// How far ahead of a timer fire a persisted next run may lie and still count as due.
const TIMER_SLACK_SECS: i64 = 5;

/// What caused a schedule to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fire {
    /// The cron engine fired the job at `fired`.
    Timer { fired: DateTime<Utc> },
    /// The reconciliation loop saw the schedule overdue at `observed`.
    Reconcile { observed: DateTime<Utc> },
    /// Explicit request; waits for a running attempt and ignores `enabled`.
    OnDemand,
}

impl Fire {
    /// Latest `next_run` at which the schedule is still due for this fire.
    fn due_by(&self) -> Option<DateTime<Utc>> {
        match *self {
            Fire::Timer { fired } => Some(fired + chrono::Duration::seconds(TIMER_SLACK_SECS)),
            Fire::Reconcile { observed } => Some(observed),
            Fire::OnDemand => None,
        }
    }
}

/// One mutex per schedule so at most one attempt runs per schedule.
#[derive(Default)]
pub struct ScheduleLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ScheduleLocks {
    async fn get(&self, schedule_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(schedule_id).or_default().clone()
    }

    pub async fn acquire(&self, schedule_id: Uuid, wait: bool) -> Option<OwnedMutexGuard<()>> {
        let lock = self.get(schedule_id).await;
        if wait {
            Some(lock.lock_owned().await)
        } else {
            lock.try_lock_owned().ok()
        }
    }

    /// Drops the lock of a schedule nobody is running or waiting on.
    pub async fn forget(&self, schedule_id: Uuid) -> bool {
        let mut locks = self.locks.lock().await;
        match locks.get(&schedule_id) {
            Some(lock) if Arc::strong_count(lock) == 1 => locks.remove(&schedule_id).is_some(),
            _ => false,
        }
    }

    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Runs backups for schedules and manual requests and records the outcome.
pub struct BackupRunner {
    catalog: Arc<dyn Catalog>,
    pipeline: ExecutionPipeline,
    next_run: NextRunCalculator,
    alerts: Arc<dyn AlertSink>,
    locks: ScheduleLocks,
}

impl BackupRunner {
    pub fn new(catalog: Arc<dyn Catalog>, pipeline: ExecutionPipeline, alerts: Arc<dyn AlertSink>) -> BackupRunner {
        BackupRunner {
            next_run: NextRunCalculator::new(catalog.clone()),
            catalog,
            pipeline,
            alerts,
            locks: ScheduleLocks::default(),
        }
    }

    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    pub fn locks(&self) -> &ScheduleLocks {
        &self.locks
    }

    /// Runs the schedule, returning `None` when the attempt was skipped.
    pub async fn run_schedule(&self, schedule_id: Uuid, fire: Fire) -> Result<Option<BackupRecord>> {
        let Some(_guard) = self.locks.acquire(schedule_id, fire == Fire::OnDemand).await else {
            info!("Schedule {} is already running, skipping {:?} trigger", schedule_id, fire);
            return Ok(None);
        };

        // Re-read under the lock; the registration may be older than the row.
        let schedule = self
            .catalog
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| Error::not_found("schedule", schedule_id))?;

        if fire != Fire::OnDemand && !schedule.enabled {
            debug!("Schedule {} is disabled, skipping", schedule_id);
            return Ok(None);
        }
        if let Some(due_by) = fire.due_by() {
            if matches!(schedule.next_run, Some(next_run) if next_run > due_by) {
                debug!("Schedule {} is not due by {}, skipping {:?} trigger", schedule_id, due_by, fire);
                return Ok(None);
            }
        }

        let Some(database) = self.catalog.get_database(schedule.database_id).await? else {
            // Still advance, or reconciliation would retry every tick.
            self.advance(&schedule).await?;
            return Err(Error::not_found("database", schedule.database_id));
        };

        let record = self.pipeline.execute(&database, Some(schedule.id)).await;
        let completed = self.complete(&database, &record, Some(&schedule)).await;
        let advanced = self.advance(&schedule).await;
        completed?;
        advanced?;
        Ok(Some(record))
    }

    pub async fn run_manual(&self, database_id: Uuid) -> Result<BackupRecord> {
        let database = self
            .catalog
            .get_database(database_id)
            .await?
            .ok_or_else(|| Error::not_found("database", database_id))?;

        let record = self.pipeline.execute(&database, None).await;
        self.complete(&database, &record, None).await?;
        Ok(record)
    }

    /// Entry point for the timer and the reconciliation loop; errors are logged.
    pub async fn fire(&self, schedule_id: Uuid, fire: Fire) {
        match self.run_schedule(schedule_id, fire).await {
            Ok(Some(record)) => debug!(
                "Schedule {} produced backup {} ({:?})",
                schedule_id, record.id, record.status
            ),
            Ok(None) => {}
            Err(err) => error!("Scheduled backup {} failed to run: {}", schedule_id, err),
        }
    }

    async fn complete(
        &self,
        database: &DatabaseDescriptor,
        record: &BackupRecord,
        schedule: Option<&ScheduleDescriptor>,
    ) -> Result<()> {
        self.catalog.insert_backup(record).await?;

        match record.status {
            BackupStatus::Success => {
                let now = Utc::now();
                if let Some(schedule) = schedule {
                    self.catalog.set_last_run(schedule.id, now).await?;
                }
                self.catalog.record_backup_completion(database.id, now).await?;
            }
            BackupStatus::Failed => {
                let message = record.error.as_deref().unwrap_or("unknown error");
                self.alerts
                    .create_alert(
                        AlertKind::BackupFailed,
                        &format!("Backup of {} failed", database.name),
                        message,
                        &database.name,
                    )
                    .await;
            }
            BackupStatus::InProgress => {
                error!("Backup {} was persisted before it finished", record.id);
            }
        }
        Ok(())
    }

    async fn advance(&self, schedule: &ScheduleDescriptor) -> Result<DateTime<Utc>> {
        self.next_run.refresh(schedule, Utc::now()).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::memory_catalog;
    use crate::catalog::{SqliteCatalog, DEFAULT_BACKUP_LIMIT};
    use crate::database::{new_id, EngineKind, TriggerKind};
    use crate::pipeline::tests::FakeProvider;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    pub(crate) struct RecordingAlerts {
        pub alerts: std::sync::Mutex<Vec<(AlertKind, String)>>,
    }

    #[async_trait]
    impl AlertSink for RecordingAlerts {
        async fn create_alert(&self, kind: AlertKind, _title: &str, message: &str, _database_name: &str) {
            self.alerts.lock().unwrap().push((kind, message.to_string()));
        }
    }

    pub(crate) struct Fixture {
        pub catalog: Arc<SqliteCatalog>,
        pub provider: Arc<FakeProvider>,
        pub alerts: Arc<RecordingAlerts>,
        pub cancel: CancellationToken,
        pub dir: TempDir,
        pub database: DatabaseDescriptor,
    }

    impl Fixture {
        pub(crate) async fn new(provider: FakeProvider) -> Fixture {
            let catalog = Arc::new(memory_catalog().await);
            let database = DatabaseDescriptor::new("shop", "mysql", "localhost", 3306, "root", "pw", "shop");
            catalog.insert_database(&database).await.unwrap();
            Fixture {
                catalog,
                provider: Arc::new(provider),
                alerts: Arc::new(RecordingAlerts::default()),
                cancel: CancellationToken::new(),
                dir: tempdir().unwrap(),
                database,
            }
        }

        pub(crate) fn pipeline(&self, dir: &Path) -> ExecutionPipeline {
            ExecutionPipeline::new(dir.to_path_buf(), Duration::from_secs(60), self.cancel.clone())
                .with_provider(EngineKind::MySql, self.provider.clone())
        }

        pub(crate) fn runner(&self) -> Arc<BackupRunner> {
            Arc::new(BackupRunner::new(
                self.catalog.clone(),
                self.pipeline(self.dir.path()),
                self.alerts.clone(),
            ))
        }

        pub(crate) async fn schedule(&self, cron_expression: &str) -> ScheduleDescriptor {
            let schedule = ScheduleDescriptor::new(&self.database, cron_expression);
            self.catalog.insert_schedule(&schedule).await.unwrap();
            schedule
        }
    }

    #[tokio::test]
    async fn test_scheduled_success_updates_state() {
        let fixture = Fixture::new(FakeProvider::new(512)).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let before = Utc::now();

        let record = fixture
            .runner()
            .run_schedule(schedule.id, Fire::OnDemand)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.status, BackupStatus::Success);
        assert_eq!(record.trigger, TriggerKind::Scheduled);
        assert_eq!(record.size.as_deref(), Some("512 B"));

        let stored = fixture.catalog.get_backup(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BackupStatus::Success);

        let schedule = fixture.catalog.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(schedule.last_run.unwrap() >= before);
        assert!(schedule.next_run.unwrap() > before);

        let database = fixture.catalog.get_database(fixture.database.id).await.unwrap().unwrap();
        assert_eq!(database.backup_count, 1);
        assert!(database.last_backup.is_some());
    }

    #[tokio::test]
    async fn test_failure_records_and_alerts() {
        let fixture = Fixture::new(FakeProvider::new(10).failing("mysqldump: access denied")).await;
        let schedule = fixture.schedule("0 2 * * *").await;

        let record = fixture
            .runner()
            .run_schedule(schedule.id, Fire::Timer { fired: Utc::now() })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.status, BackupStatus::Failed);
        let stored = fixture.catalog.get_backup(record.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("mysqldump: access denied"));

        let database = fixture.catalog.get_database(fixture.database.id).await.unwrap().unwrap();
        assert_eq!(database.backup_count, 0);
        let schedule = fixture.catalog.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(schedule.last_run.is_none());
        assert!(schedule.next_run.is_some());

        let alerts = fixture.alerts.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, AlertKind::BackupFailed);
    }

    #[tokio::test]
    async fn test_disabled_schedule_skipped_by_timer() {
        let fixture = Fixture::new(FakeProvider::new(10)).await;
        let mut schedule = fixture.schedule("0 2 * * *").await;
        schedule.enabled = false;
        fixture.catalog.update_schedule(&schedule).await.unwrap();
        let runner = fixture.runner();

        assert!(runner.run_schedule(schedule.id, Fire::Timer { fired: Utc::now() }).await.unwrap().is_none());
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 0);

        // Explicit runs ignore the flag.
        assert!(runner.run_schedule(schedule.id, Fire::OnDemand).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_database_advances_next_run() {
        let fixture = Fixture::new(FakeProvider::new(10)).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        fixture.catalog.delete_database(fixture.database.id).await.unwrap();

        let result = fixture.runner().run_schedule(schedule.id, Fire::Timer { fired: Utc::now() }).await;

        assert!(matches!(result, Err(Error::NotFound { kind: "database", .. })));
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 0);
        let schedule = fixture.catalog.get_schedule(schedule.id).await.unwrap().unwrap();
        assert!(schedule.next_run.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_are_serialized() {
        let fixture = Fixture::new(FakeProvider::new(10).with_delay(Duration::from_millis(200))).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let runner = fixture.runner();

        let (first, second) = tokio::join!(
            runner.run_schedule(schedule.id, Fire::OnDemand),
            runner.run_schedule(schedule.id, Fire::OnDemand)
        );

        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();
        assert_ne!(first.file_path, second.file_path);
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.provider.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timer_skips_while_running() {
        let fixture = Fixture::new(FakeProvider::new(10).with_delay(Duration::from_millis(300))).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let runner = fixture.runner();

        let running = {
            let runner = runner.clone();
            let id = schedule.id;
            tokio::spawn(async move { runner.run_schedule(id, Fire::OnDemand).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let skipped = runner.run_schedule(schedule.id, Fire::Timer { fired: Utc::now() }).await.unwrap();
        assert!(skipped.is_none());

        assert!(running.await.unwrap().unwrap().is_some());
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.provider.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconcile_skips_when_no_longer_due() {
        let fixture = Fixture::new(FakeProvider::new(10)).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let observed = Utc::now();
        fixture
            .catalog
            .set_next_run(schedule.id, observed + chrono::Duration::hours(1))
            .await
            .unwrap();

        let result = fixture
            .runner()
            .run_schedule(schedule.id, Fire::Reconcile { observed })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_skips_after_reconcile_ran() {
        let fixture = Fixture::new(FakeProvider::new(10)).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let runner = fixture.runner();
        let due = Utc::now() - chrono::Duration::seconds(1);
        fixture.catalog.set_next_run(schedule.id, due).await.unwrap();

        let reconciled = runner
            .run_schedule(schedule.id, Fire::Reconcile { observed: Utc::now() })
            .await
            .unwrap();
        assert!(reconciled.is_some());

        // The cron engine delivers its fire for the same slot late.
        let late = runner.run_schedule(schedule.id, Fire::Timer { fired: due }).await.unwrap();
        assert!(late.is_none());
        assert_eq!(fixture.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timer_runs_when_slot_is_due() {
        let fixture = Fixture::new(FakeProvider::new(10)).await;
        let schedule = fixture.schedule("0 2 * * *").await;
        let fired = Utc::now();
        fixture
            .catalog
            .set_next_run(schedule.id, fired + chrono::Duration::seconds(1))
            .await
            .unwrap();

        let record = fixture
            .runner()
            .run_schedule(schedule.id, Fire::Timer { fired })
            .await
            .unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn test_forget_keeps_held_locks() {
        let locks = ScheduleLocks::default();
        let held = new_id();
        let idle = new_id();

        let guard = locks.acquire(held, false).await.unwrap();
        drop(locks.acquire(idle, false).await.unwrap());
        assert_eq!(locks.tracked().await, 2);

        assert!(!locks.forget(held).await);
        assert!(locks.forget(idle).await);
        assert!(!locks.forget(new_id()).await);
        assert_eq!(locks.tracked().await, 1);

        drop(guard);
        assert!(locks.forget(held).await);
        assert_eq!(locks.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_manual_backup() {
        let fixture = Fixture::new(FakeProvider::new(4096)).await;
        let runner = fixture.runner();

        let record = runner.run_manual(fixture.database.id).await.unwrap();
        assert_eq!(record.trigger, TriggerKind::Manual);
        assert_eq!(record.schedule_id, None);
        assert_eq!(record.size.as_deref(), Some("4.00 KB"));

        let backups = fixture
            .catalog
            .list_backups(Some(fixture.database.id), DEFAULT_BACKUP_LIMIT)
            .await
            .unwrap();
        assert_eq!(backups.len(), 1);

        let missing = runner.run_manual(Uuid::nil()).await;
        assert!(matches!(missing, Err(Error::NotFound { kind: "database", .. })));
    }
}

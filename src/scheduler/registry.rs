use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::types::Uuid;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::alert::{AlertKind, AlertSink};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::database::{BackupRecord, ScheduleDescriptor};
use crate::error::{Error, Result};
use crate::pipeline::ExecutionPipeline;
use crate::scheduler::next_run::{self, CronSchedule, NextRunCalculator};
use crate::scheduler::reconcile::ReconciliationLoop;
use crate::scheduler::runner::{BackupRunner, Fire};

/// Shortest reconciliation period accepted.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Binding between a schedule and its cron engine jobs.
#[derive(Debug, Clone)]
struct JobHandle {
    job_ids: Vec<Uuid>,
    cron_expression: String,
}

/// Registry of recurring backup jobs on top of `tokio-cron-scheduler`.
pub struct Scheduler {
    sched: JobScheduler,
    jobs: Mutex<HashMap<Uuid, JobHandle>>,
    catalog: Arc<dyn Catalog>,
    runner: Arc<BackupRunner>,
    next_run: NextRunCalculator,
    tracker: TaskTracker,
    reconcile_interval: Duration,
    stop_loop: CancellationToken,
    cancel_executions: CancellationToken,
    started: AtomicBool,
}

impl Scheduler {
    /// `cancel_executions` must be the token the runner's pipeline watches.
    pub async fn new(
        catalog: Arc<dyn Catalog>,
        runner: Arc<BackupRunner>,
        cancel_executions: CancellationToken,
        reconcile_interval: Duration,
    ) -> Result<Scheduler> {
        let sched = JobScheduler::new().await?;

        Ok(Scheduler {
            sched,
            jobs: Mutex::new(HashMap::new()),
            next_run: NextRunCalculator::new(catalog.clone()),
            catalog,
            runner,
            tracker: TaskTracker::new(),
            reconcile_interval: reconcile_interval.max(MIN_RECONCILE_INTERVAL),
            stop_loop: CancellationToken::new(),
            cancel_executions,
            started: AtomicBool::new(false),
        })
    }

    pub async fn from_config(
        catalog: Arc<dyn Catalog>,
        config: &Config,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Scheduler> {
        let cancel = CancellationToken::new();
        let pipeline = ExecutionPipeline::from_config(config, cancel.clone());
        let runner = Arc::new(BackupRunner::new(catalog.clone(), pipeline, alerts));
        Scheduler::new(catalog, runner, cancel, config.reconcile_interval()).await
    }

    /// Starts the cron engine, registers every enabled schedule and spawns
    /// the reconciliation loop. Only the first call succeeds.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        self.sched.start().await?;

        let schedules = self.catalog.enabled_schedules().await?;
        let mut registered = 0;
        {
            let mut jobs = self.jobs.lock().await;
            for schedule in &schedules {
                match self.add_locked(&mut jobs, schedule).await {
                    Ok(Some(_)) => registered += 1,
                    Ok(None) => {}
                    Err(err) => {
                        error!(
                            "Failed to register schedule {} for {}: {}",
                            schedule.id, schedule.database_name, err
                        );
                        if let Error::Validation { .. } = err {
                            self.runner
                                .alerts()
                                .create_alert(
                                    AlertKind::ScheduleInvalid,
                                    "Schedule could not be registered",
                                    &err.to_string(),
                                    &schedule.database_name,
                                )
                                .await;
                        }
                    }
                }
            }
        }
        info!(
            "Scheduler started with {} of {} enabled schedules",
            registered,
            schedules.len()
        );

        let reconciliation = ReconciliationLoop::new(self.catalog.clone(), self.runner.clone(), self.tracker.clone());
        self.tracker
            .spawn(reconciliation.run(self.reconcile_interval, self.stop_loop.clone()));
        Ok(())
    }

    /// Halts the cron engine and the reconciliation loop. Attempts already
    /// running are left to finish.
    pub async fn stop(&self) -> Result<()> {
        self.stop_loop.cancel();
        let mut sched = self.sched.clone();
        sched.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }

    /// Stops, then waits up to `grace` for running attempts before cancelling them.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.stop().await?;
        self.tracker.close();

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "{} backup(s) still running after {:?}, cancelling",
                self.tracker.len(),
                grace
            );
            self.cancel_executions.cancel();
            self.tracker.wait().await;
        }
        info!("Scheduler shut down");
        Ok(())
    }

    /// Registers the schedule, replacing any existing registration.
    ///
    /// Returns the persisted next run, or `None` when the schedule is disabled.
    pub async fn add_schedule(&self, schedule: &ScheduleDescriptor) -> Result<Option<DateTime<Utc>>> {
        let mut jobs = self.jobs.lock().await;
        self.add_locked(&mut jobs, schedule).await
    }

    pub async fn remove_schedule(&self, schedule_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        let removed = self.remove_locked(&mut jobs, schedule_id).await?;
        self.runner.locks().forget(schedule_id).await;
        Ok(removed)
    }

    /// Replaces the registration wholesale. A firing of the old registration
    /// that already started runs to completion.
    pub async fn update_schedule(&self, schedule: &ScheduleDescriptor) -> Result<Option<DateTime<Utc>>> {
        let mut jobs = self.jobs.lock().await;
        self.remove_locked(&mut jobs, schedule.id).await?;
        if !schedule.enabled {
            return Ok(None);
        }
        self.add_locked(&mut jobs, schedule).await
    }

    pub async fn is_registered(&self, schedule_id: Uuid) -> bool {
        self.jobs.lock().await.contains_key(&schedule_id)
    }

    pub async fn registered_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Runs a schedule immediately, waiting for an attempt already running.
    pub async fn run_schedule_now(&self, schedule_id: Uuid) -> Result<BackupRecord> {
        self.runner
            .run_schedule(schedule_id, Fire::OnDemand)
            .await?
            .ok_or_else(|| Error::not_found("schedule", schedule_id))
    }

    pub async fn run_manual(&self, database_id: Uuid) -> Result<BackupRecord> {
        self.runner.run_manual(database_id).await
    }

    /// Runs one reconciliation pass now; returns how many schedules were due.
    pub async fn reconcile_now(&self) -> Result<usize> {
        let reconciliation = ReconciliationLoop::new(self.catalog.clone(), self.runner.clone(), self.tracker.clone());
        let handles = reconciliation.tick(Utc::now()).await?;
        Ok(handles.len())
    }

    async fn add_locked(
        &self,
        jobs: &mut HashMap<Uuid, JobHandle>,
        schedule: &ScheduleDescriptor,
    ) -> Result<Option<DateTime<Utc>>> {
        self.remove_locked(jobs, schedule.id).await?;

        if !schedule.enabled {
            debug!("Schedule {} is disabled, not registering", schedule.id);
            return Ok(None);
        }

        let cron_schedule = next_run::parse(&schedule.cron_expression)?;
        if self.catalog.get_database(schedule.database_id).await?.is_none() {
            return Err(Error::not_found("database", schedule.database_id));
        }

        self.register_locked(jobs, schedule, cron_schedule).await?;

        let next_run = self.next_run.refresh(schedule, Utc::now()).await?;
        info!(
            "Registered schedule {} for {} ('{}'), next run at {}",
            schedule.id, schedule.database_name, schedule.cron_expression, next_run
        );
        Ok(Some(next_run))
    }

    /// Adds one engine job per compiled schedule, all bound to the schedule id.
    async fn register_locked(
        &self,
        jobs: &mut HashMap<Uuid, JobHandle>,
        schedule: &ScheduleDescriptor,
        cron_schedule: CronSchedule,
    ) -> Result<()> {
        let schedule_id = schedule.id;
        let mut job_ids = Vec::with_capacity(cron_schedule.schedules().len());

        for timer in cron_schedule.schedules() {
            let runner = self.runner.clone();
            let tracker = self.tracker.clone();
            let job = Job::new_async(timer.clone(), move |_uuid, _scheduler| {
                let runner = runner.clone();
                let tracker = tracker.clone();

                Box::pin(async move {
                    let fired = Utc::now();
                    info!("Running scheduled backup for schedule {}", schedule_id);
                    tracker.spawn(async move { runner.fire(schedule_id, Fire::Timer { fired }).await });
                })
            })?;

            match self.sched.add(job).await {
                Ok(job_id) => job_ids.push(job_id),
                Err(err) => {
                    for job_id in &job_ids {
                        self.sched.remove(job_id).await?;
                    }
                    return Err(err.into());
                }
            }
        }

        jobs.insert(
            schedule_id,
            JobHandle {
                job_ids,
                cron_expression: schedule.cron_expression.clone(),
            },
        );
        Ok(())
    }

    async fn remove_locked(&self, jobs: &mut HashMap<Uuid, JobHandle>, schedule_id: Uuid) -> Result<bool> {
        let Some(handle) = jobs.get(&schedule_id).cloned() else {
            return Ok(false);
        };

        for job_id in &handle.job_ids {
            self.sched.remove(job_id).await?;
        }
        jobs.remove(&schedule_id);
        debug!(
            "Unregistered schedule {} ('{}')",
            schedule_id, handle.cron_expression
        );
        Ok(true)
    }
}

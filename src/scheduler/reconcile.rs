use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use sqlx::types::chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::scheduler::runner::{BackupRunner, Fire};

/// Safety net for fires the cron engine missed (restarts, clock skew).
pub struct ReconciliationLoop {
    catalog: Arc<dyn Catalog>,
    runner: Arc<BackupRunner>,
    tracker: TaskTracker,
}

impl ReconciliationLoop {
    pub fn new(catalog: Arc<dyn Catalog>, runner: Arc<BackupRunner>, tracker: TaskTracker) -> ReconciliationLoop {
        ReconciliationLoop {
            catalog,
            runner,
            tracker,
        }
    }

    /// Spawns a run for every schedule due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let due = self.catalog.due_schedules(now).await?;
        if !due.is_empty() {
            info!("Reconciliation found {} overdue schedule(s)", due.len());
        }

        let handles = due
            .into_iter()
            .map(|schedule| {
                let runner = self.runner.clone();
                self.tracker
                    .spawn(async move { runner.fire(schedule.id, Fire::Reconcile { observed: now }).await })
            })
            .collect();
        Ok(handles)
    }

    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        // interval_at panics on a zero period.
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        warn!("Reconciliation query failed, retrying next tick: {}", err);
                    }
                }
            }
        }
        info!("Reconciliation loop stopped");
    }
}

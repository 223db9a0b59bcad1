//! Recurring backup orchestration.
//!
//! [`Scheduler`] keeps one cron job per enabled schedule; each fire hands the
//! schedule id to the [`BackupRunner`], which re-reads the schedule and its
//! database, runs the [`ExecutionPipeline`](crate::pipeline::ExecutionPipeline)
//! and records the outcome. The [`ReconciliationLoop`] periodically picks up
//! schedules whose next run passed without a fire.

pub mod next_run;
pub mod reconcile;
pub mod registry;
pub mod runner;

pub use next_run::{CronSchedule, NextRunCalculator};
pub use reconcile::ReconciliationLoop;
pub use registry::Scheduler;
pub use runner::{BackupRunner, Fire};

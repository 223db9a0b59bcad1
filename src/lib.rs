//! Orchestrates recurring and on-demand database backups.
//!
//! Schedules live in a [`Catalog`]; the [`Scheduler`] turns each enabled
//! schedule into a cron job and a reconciliation loop catches anything the
//! cron engine missed. Every attempt goes through the
//! [`ExecutionPipeline`], which drives a [`DumpProvider`] for the database's
//! engine and produces a [`BackupRecord`].

pub mod alert;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod utils;

pub use alert::{AlertKind, AlertSink, LogAlertSink};
pub use catalog::{Catalog, SqliteCatalog};
pub use config::{Config, ExecutionStrategy};
pub use database::{BackupRecord, BackupStatus, DatabaseDescriptor, EngineKind, ScheduleDescriptor, TriggerKind};
pub use error::{Error, Result};
pub use pipeline::ExecutionPipeline;
pub use scheduler::Scheduler;
pub use service::{DumpError, DumpProvider};

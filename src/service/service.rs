use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;

use crate::database::DatabaseDescriptor;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("{0} not found in PATH or configured tool paths")]
    ToolNotFound(String),
    #[error("{tool} failed: {status}, stderr: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Produces an on-disk backup artifact for one database.
#[async_trait]
pub trait DumpProvider: Send + Sync {
    /// Dumps `database` into `target` and returns the artifact location.
    ///
    /// On error no artifact may be left at `target`.
    async fn dump(&self, database: &DatabaseDescriptor, target: &Path) -> Result<PathBuf, DumpError>;
}

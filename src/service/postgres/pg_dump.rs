use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{info, warn};

use crate::database::DatabaseDescriptor;
use crate::service::command::{normalize_host, DumpRunner};
use crate::service::{DumpError, DumpProvider};

const TOOL: &str = "pg_dump";

/// Custom-format dump written to stdout.
pub fn create_args(host: &str, port: u16, username: &str, database: &str) -> Vec<String> {
    vec![
        "-h".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
        "-U".to_string(),
        username.to_string(),
        "-d".to_string(),
        database.to_string(),
        "-F".to_string(),
        "c".to_string(),
    ]
}

/// Inside the container pg_dump connects over the local socket.
pub fn create_container_args(username: &str, database: &str) -> Vec<String> {
    vec![
        "-U".to_string(),
        username.to_string(),
        "-d".to_string(),
        database.to_string(),
        "-F".to_string(),
        "c".to_string(),
    ]
}

pub struct PgDumpProvider {
    runner: DumpRunner,
}

impl PgDumpProvider {
    pub fn new(runner: DumpRunner) -> PgDumpProvider {
        PgDumpProvider { runner }
    }
}

#[async_trait]
impl DumpProvider for PgDumpProvider {
    async fn dump(&self, database: &DatabaseDescriptor, target: &Path) -> Result<PathBuf, DumpError> {
        let host = normalize_host(&database.host);
        let envs = [("PGPASSWORD", database.password.as_str())];
        info!("Dumping PostgreSQL database {} from {}:{}", database.database_name, host, database.port);

        if let Some(container) = self.runner.container_for(&host) {
            let args = create_container_args(&database.username, &database.database_name);
            match self.runner.run_in_container(container, TOOL, &args, &envs, target).await {
                Ok(()) => return Ok(target.to_path_buf()),
                Err(error) => warn!(
                    "pg_dump in container {} failed, falling back to direct invocation: {}",
                    container, error
                ),
            }
        }

        let args = create_args(&host, database.port, &database.username, &database.database_name);
        self.runner.run_direct(TOOL, &args, &envs, target).await?;
        Ok(target.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_args() {
        let args = create_args("127.0.0.1", 5433, "postgres", "blog");
        assert_eq!(
            args,
            vec!["-h", "127.0.0.1", "-p", "5433", "-U", "postgres", "-d", "blog", "-F", "c"]
        );
    }

    #[test]
    fn test_container_args_skip_host() {
        let args = create_container_args("postgres", "blog");
        assert!(!args.contains(&"-h".to_string()));
        assert_eq!(args, vec!["-U", "postgres", "-d", "blog", "-F", "c"]);
    }
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{info, warn};

use crate::database::DatabaseDescriptor;
use crate::service::command::{normalize_host, DumpRunner};
use crate::service::mysql::mysql_defaults::MySqlDefaults;
use crate::service::{DumpError, DumpProvider};

const TOOL: &str = "mysqldump";

pub fn create_args(defaults_path: &Path, database: &str) -> Vec<String> {
    vec![
        // Must stay the first argument.
        format!("--defaults-file={}", defaults_path.display()),
        "--protocol=TCP".to_string(),
        "--single-transaction".to_string(),
        "--quick".to_string(),
        "--lock-tables=false".to_string(),
        database.to_string(),
    ]
}

pub fn create_container_args(username: &str, database: &str) -> Vec<String> {
    vec![
        "-u".to_string(),
        username.to_string(),
        "--single-transaction".to_string(),
        "--quick".to_string(),
        "--lock-tables=false".to_string(),
        database.to_string(),
    ]
}

pub struct MySqlDumpProvider {
    runner: DumpRunner,
}

impl MySqlDumpProvider {
    pub fn new(runner: DumpRunner) -> MySqlDumpProvider {
        MySqlDumpProvider { runner }
    }
}

#[async_trait]
impl DumpProvider for MySqlDumpProvider {
    async fn dump(&self, database: &DatabaseDescriptor, target: &Path) -> Result<PathBuf, DumpError> {
        let host = normalize_host(&database.host);
        info!("Dumping MySQL database {} from {}:{}", database.database_name, host, database.port);

        if let Some(container) = self.runner.container_for(&host) {
            let args = create_container_args(&database.username, &database.database_name);
            let envs = [("MYSQL_PWD", database.password.as_str())];
            match self.runner.run_in_container(container, TOOL, &args, &envs, target).await {
                Ok(()) => return Ok(target.to_path_buf()),
                Err(error) => warn!(
                    "mysqldump in container {} failed, falling back to direct invocation: {}",
                    container, error
                ),
            }
        }

        let defaults = MySqlDefaults {
            host,
            port: database.port,
            user: database.username.clone(),
            password: database.password.clone(),
        }
        .write_temp()?;

        let args = create_args(defaults.path(), &database.database_name);
        self.runner.run_direct(TOOL, &args, &[], target).await?;
        Ok(target.to_path_buf())
    }
}

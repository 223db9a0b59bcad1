use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

fn default_catalog_url() -> String {
    "sqlite://backups.db".to_string()
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_execution_timeout() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_tool_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/opt/homebrew/opt/mysql-client/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
    ]
}

/// How dump tools are invoked for databases living on the loopback host.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Direct,
    /// Run the dump tool inside a local container through `docker exec`,
    /// falling back to a direct invocation when that fails.
    Container { name: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_tool_paths")]
    pub tool_paths: Vec<PathBuf>,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            catalog_url: default_catalog_url(),
            backup_dir: default_backup_dir(),
            reconcile_interval_secs: default_reconcile_interval(),
            execution_timeout_secs: default_execution_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            max_connections: default_max_connections(),
            tool_paths: default_tool_paths(),
            strategy: ExecutionStrategy::default(),
        }
    }
}

impl Config {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Config> {
        let config_str = fs::read_to_string(path).await?;
        Config::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.catalog_url, "sqlite://backups.db");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(config.execution_timeout(), Duration::from_secs(3600));
        assert_eq!(config.strategy, ExecutionStrategy::Direct);
        assert_eq!(config.tool_paths.len(), 3);
    }

    #[test]
    fn test_container_strategy() {
        let config = Config::parse(
            r#"
            backup_dir = "/opt/backup"
            reconcile_interval_secs = 30

            [strategy]
            type = "container"
            name = "local-postgres"
            "#,
        )
        .unwrap();

        assert_eq!(config.backup_dir, PathBuf::from("/opt/backup"));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(30));
        assert_eq!(
            config.strategy,
            ExecutionStrategy::Container {
                name: "local-postgres".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "execution_timeout_secs = 120").unwrap();
        writeln!(file, "tool_paths = [\"/usr/lib/postgresql/16/bin\"]").unwrap();

        let config = Config::new(file.path()).await.unwrap();

        assert_eq!(config.execution_timeout(), Duration::from_secs(120));
        assert_eq!(config.tool_paths, vec![PathBuf::from("/usr/lib/postgresql/16/bin")]);
    }

    #[test]
    fn test_invalid_config() {
        let result = Config::parse("reconcile_interval_secs = \"soon\"");
        assert!(result.is_err());
    }
}

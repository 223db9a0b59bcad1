use std::path::Path;
use std::sync::Arc;

use backup_orchestrator::{Catalog, Config, LogAlertSink, Scheduler, SqliteCatalog};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::new(&config_path).await?
    } else {
        warn!("Config file {} not found, using defaults", config_path);
        Config::default()
    };

    tokio::fs::create_dir_all(&config.backup_dir).await?;
    let catalog: Arc<dyn Catalog> =
        Arc::new(SqliteCatalog::connect(&config.catalog_url, config.max_connections).await?);

    let scheduler = Scheduler::from_config(catalog, &config, Arc::new(LogAlertSink)).await?;
    scheduler.start().await?;
    info!("Catalog: {}", config.catalog_url);
    info!("Backup directory: {}", config.backup_dir.display());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.shutdown(config.shutdown_grace()).await?;

    Ok(())
}

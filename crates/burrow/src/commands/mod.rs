pub mod key;
pub mod user;

use anyhow::{Context, Result};
use burrow_core::ServerConfig;
use burrow_db::Database;
use std::path::Path;

use crate::config;

pub async fn init_config(config_path: &Path) -> Result<()> {
    let default_config = ServerConfig::default();
    config::save_config(config_path, &default_config).await?;
    println!("Configuration file created at: {}", config_path.display());
    println!("\nAdd at least one entry to administrative_users and create a host key before starting the server.");
    Ok(())
}

async fn open_database(config_path: &Path) -> Result<Database> {
    let config = config::load_config(config_path).await?;
    Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

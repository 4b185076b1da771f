use anyhow::{Context, Result};
use burrow_core::ServerConfig;
use std::path::Path;
use tokio::fs;

pub async fn load_config(path: &Path) -> Result<ServerConfig> {
    let contents = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: ServerConfig =
        toml::from_str(&contents).context("Failed to parse configuration file")?;

    Ok(config)
}

pub async fn save_config(path: &Path, config: &ServerConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    fs::write(path, contents)
        .await
        .context("Failed to write configuration file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_saved_defaults_load_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        save_config(&path, &ServerConfig::default()).await.unwrap();
        let loaded = load_config(&path).await.unwrap();

        assert_eq!(loaded.ssh_port, 2222);
        assert_eq!(loaded.api_port, 8080);
        assert!(loaded.administrative_users.is_empty());
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "ssh_port = 2022\nadministrative_users = [\"root\"]\n")
            .await
            .unwrap();

        let loaded = load_config(&path).await.unwrap();

        assert_eq!(loaded.ssh_port, 2022);
        assert_eq!(loaded.shutdown_grace_secs, 10);
        assert_eq!(loaded.administrative_users, vec!["root".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).await.is_err());
    }
}

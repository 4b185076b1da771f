use anyhow::{Context, Result, bail};
use burrow_core::{keys_equal, parse_public_key};
use burrow_db::Database;
use std::path::Path;

use crate::KeyCommands;

pub async fn handle(config_path: &Path, command: KeyCommands) -> Result<()> {
    let db = super::open_database(config_path).await?;

    match command {
        KeyCommands::List { username } => list(&db, &username).await?,
        KeyCommands::Add { username, key_file } => add(&db, &username, &key_file).await?,
        KeyCommands::Remove { username, id } => remove(&db, &username, id).await?,
    }

    db.close().await;
    Ok(())
}

async fn list(db: &Database, username: &str) -> Result<()> {
    if !db.user_exists(username).await? {
        bail!("User not found: {}", username);
    }

    let credentials = db.list_credentials_for(username).await?;
    if credentials.is_empty() {
        println!("No keys registered for '{}'.", username);
        return Ok(());
    }

    println!("\n{:<6} {:<26} {}", "ID", "Added", "Key");
    println!("{}", "-".repeat(90));

    for credential in credentials {
        println!(
            "{:<6} {:<26} {}",
            credential.id,
            credential.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            credential.public_key
        );
    }

    println!();
    Ok(())
}

async fn add(db: &Database, username: &str, key_file: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(key_file)
        .await
        .with_context(|| format!("Failed to read {}", key_file.display()))?;

    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if lines.is_empty() {
        bail!("No public key found in {}", key_file.display());
    }

    let mut existing = db.list_credentials_for(username).await?;

    for line in lines {
        let key = parse_public_key(line)?;

        let duplicate = existing.iter().any(|c| {
            parse_public_key(&c.public_key)
                .map(|stored| keys_equal(&stored, &key))
                .unwrap_or(false)
        });
        if duplicate {
            println!("Skipping {} key already registered for '{}'.", key.algorithm(), username);
            continue;
        }

        let credential = db.create_credential(username, line).await?;
        println!(
            "Added {} key for '{}' (ID {}).",
            key.algorithm(),
            username,
            credential.id
        );
        existing.push(credential);
    }

    Ok(())
}

async fn remove(db: &Database, username: &str, id: i64) -> Result<()> {
    db.delete_credential(username, id).await?;

    println!("Key {} removed from '{}'.", id, username);
    println!("Running servers keep the old credentials until restarted.");
    Ok(())
}

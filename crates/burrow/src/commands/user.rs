use anyhow::Result;
use burrow_core::validate_username;
use burrow_db::Database;
use std::path::Path;

use crate::UserCommands;

pub async fn handle(config_path: &Path, command: UserCommands) -> Result<()> {
    let db = super::open_database(config_path).await?;

    match command {
        UserCommands::List => list(&db).await?,
        UserCommands::Add { username } => add(&db, &username).await?,
        UserCommands::Remove { username } => remove(&db, &username).await?,
    }

    db.close().await;
    Ok(())
}

async fn list(db: &Database) -> Result<()> {
    let users = db.list_users().await?;

    if users.is_empty() {
        println!("No users registered.");
        return Ok(());
    }

    for user in users {
        println!("{}", user.username);
    }

    Ok(())
}

async fn add(db: &Database, username: &str) -> Result<()> {
    validate_username(username)?;
    db.create_user(username).await?;

    println!("User '{}' added.", username);
    Ok(())
}

async fn remove(db: &Database, username: &str) -> Result<()> {
    db.delete_user(username).await?;

    println!("User '{}' and their keys removed.", username);
    println!("Running servers keep the old credentials until restarted.");
    Ok(())
}

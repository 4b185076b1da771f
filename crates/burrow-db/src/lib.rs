use burrow_core::*;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file and apply migrations
    pub async fn new(database_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        debug!(path = %database_path.display(), "Database opened");
        Ok(db)
    }

    /// Private in-memory database, used by tests
    ///
    /// The pool holds a single connection that never expires, since every
    /// new SQLite `:memory:` connection would otherwise see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                username TEXT NOT NULL,
                public_key TEXT NOT NULL,
                UNIQUE (username, public_key),
                FOREIGN KEY (username) REFERENCES users(username) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // User operations
    pub async fn create_user(&self, username: &str) -> Result<User> {
        sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if unique_violation(&e) {
                    BurrowError::UserExists(username.to_string())
                } else {
                    e.into()
                }
            })?;

        Ok(User {
            username: username.to_string(),
        })
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT username FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>("SELECT username FROM users ORDER BY username")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Delete a user together with every credential they own
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BurrowError::UserNotFound(username.to_string()));
        }

        Ok(())
    }

    // Credential operations
    pub async fn create_credential(&self, username: &str, public_key: &str) -> Result<UserCredential> {
        if !self.user_exists(username).await? {
            return Err(BurrowError::UserNotFound(username.to_string()));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO user_credentials (created_at, username, public_key)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(created_at.to_rfc3339())
        .bind(username)
        .bind(public_key)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if unique_violation(&e) {
                BurrowError::CredentialExists(username.to_string())
            } else if foreign_key_violation(&e) {
                // user removed between the existence check and the insert
                BurrowError::UserNotFound(username.to_string())
            } else {
                e.into()
            }
        })?;

        Ok(UserCredential {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            public_key: public_key.to_string(),
            created_at,
        })
    }

    pub async fn list_credentials_for(&self, username: &str) -> Result<Vec<UserCredential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM user_credentials WHERE username = ? ORDER BY id",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Every stored credential, ordered by username then insertion order
    pub async fn list_all_credentials(&self) -> Result<Vec<UserCredential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT * FROM user_credentials ORDER BY username, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn delete_credential(&self, username: &str, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM user_credentials WHERE id = ? AND username = ?")
            .bind(id)
            .bind(username)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BurrowError::CredentialNotFound(id));
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

// Row structures for SQLite
#[derive(sqlx::FromRow)]
struct UserRow {
    username: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            username: row.username,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: i64,
    created_at: String,
    username: String,
    public_key: String,
}

impl TryFrom<CredentialRow> for UserCredential {
    type Error = BurrowError;

    fn try_from(row: CredentialRow) -> std::result::Result<Self, Self::Error> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| BurrowError::Parse(format!("credential {} created_at: {e}", row.id)))?
            .with_timezone(&Utc);

        Ok(UserCredential {
            id: row.id,
            username: row.username,
            public_key: row.public_key,
            created_at,
        })
    }
}

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::{BurrowError, Result};

/// Account allowed to hold credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

/// Public key registered for a user
///
/// The pair (username, public_key) is unique; a user may own several keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub id: i64,
    pub username: String,
    /// Key exactly as submitted, in OpenSSH `authorized_keys` line format
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// How a listener finished draining after a shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight session or request finished inside the grace period
    Drained,
    /// The grace period expired and remaining work was force-closed
    TimedOut,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// One JSON object per line, for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error or a full EnvFilter string)
    pub level: String,
    pub format: LogFormat,
    /// Optional log file; logs go to stdout when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the SSH listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Address the administrative API binds to
    #[serde(default = "default_api_bind_address")]
    pub api_bind_address: IpAddr,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// OpenSSH private key presented as the server identity; must be unencrypted
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// Base directory holding one sub-directory per user
    #[serde(default = "default_users_dir")]
    pub users_dir: PathBuf,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Usernames allowed to call the administrative API
    #[serde(default)]
    pub administrative_users: Vec<String>,

    /// Time in-flight sessions and requests get to finish after a shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// Fixed delay applied to every rejected authentication attempt
    #[serde(default = "default_auth_rejection_time")]
    pub auth_rejection_time_secs: u64,

    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ssh_port: default_ssh_port(),
            api_bind_address: default_api_bind_address(),
            api_port: default_api_port(),
            host_key_path: default_host_key_path(),
            users_dir: default_users_dir(),
            database_path: default_database_path(),
            administrative_users: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            auth_rejection_time_secs: default_auth_rejection_time(),
            max_auth_attempts: default_max_auth_attempts(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Check everything that must hold before any listener starts
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::InvalidConfig` when the host key file or users
    /// directory is missing, a port is zero, or no administrative user is set.
    pub fn validate(&self) -> Result<()> {
        if !self.host_key_path.is_file() {
            return Err(BurrowError::InvalidConfig(format!(
                "host key file does not exist: {}",
                self.host_key_path.display()
            )));
        }

        if self.ssh_port == 0 {
            return Err(BurrowError::InvalidConfig(
                "ssh_port must be a positive port number".to_string(),
            ));
        }

        if self.api_port == 0 {
            return Err(BurrowError::InvalidConfig(
                "api_port must be a positive port number".to_string(),
            ));
        }

        if !self.users_dir.is_dir() {
            return Err(BurrowError::InvalidConfig(format!(
                "users directory does not exist: {}",
                self.users_dir.display()
            )));
        }

        if self.administrative_users.is_empty() {
            return Err(BurrowError::InvalidConfig(
                "administrative_users must name at least one user".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_administrator(&self, username: &str) -> bool {
        self.administrative_users.iter().any(|admin| admin == username)
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_ssh_port() -> u16 {
    2222
}

fn default_api_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_api_port() -> u16 {
    8080
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("/etc/burrow/ssh_host_ed25519_key")
}

fn default_users_dir() -> PathBuf {
    PathBuf::from("/var/lib/burrow/users")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/burrow/burrow.db")
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_inactivity_timeout() -> u64 {
    300 // 5 minutes
}

fn default_auth_rejection_time() -> u64 {
    3
}

fn default_max_auth_attempts() -> usize {
    6
}

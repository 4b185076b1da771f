mod commands;
mod config;
mod lifecycle;
mod logging;

use burrow_core::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "SFTP-only file server with per-user directory jails", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/burrow/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the SSH listener and the admin API
    Serve {
        /// SSH port (overrides the configuration file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Admin API port
        #[arg(long)]
        api_port: Option<u16>,

        /// Base directory holding per-user roots
        #[arg(long)]
        users_dir: Option<PathBuf>,

        /// Host key path
        #[arg(long)]
        host_key: Option<PathBuf>,

        /// Log format (json or text)
        #[arg(long)]
        log_format: Option<LogFormat>,

        /// Log file path
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Verbose logging (debug level)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a default configuration file
    InitConfig,

    /// Manage users
    #[command(subcommand)]
    User(UserCommands),

    /// Manage registered public keys
    #[command(subcommand)]
    Key(KeyCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// List all users
    List,

    /// Add a user
    Add {
        /// Username
        username: String,
    },

    /// Remove a user and all of their keys
    Remove {
        /// Username
        username: String,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// List keys registered for a user
    List {
        /// Username
        username: String,
    },

    /// Register a public key for a user
    Add {
        /// Username
        username: String,

        /// Path to an OpenSSH public key file (one key per line)
        key_file: PathBuf,
    },

    /// Remove a registered key
    Remove {
        /// Username
        username: String,

        /// Credential ID, as shown by `burrow key list`
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            api_port,
            users_dir,
            host_key,
            log_format,
            log_file,
            verbose,
        } => {
            let mut config = config::load_config(&cli.config).await?;

            if let Some(port) = port {
                config.ssh_port = port;
            }
            if let Some(api_port) = api_port {
                config.api_port = api_port;
            }
            if let Some(users_dir) = users_dir {
                config.users_dir = users_dir;
            }
            if let Some(host_key) = host_key {
                config.host_key_path = host_key;
            }
            if let Some(log_format) = log_format {
                config.logging.format = log_format;
            }
            if let Some(log_file) = log_file {
                config.logging.file = Some(log_file);
            }
            if verbose {
                config.logging.level = "debug".to_string();
            }

            // The guard flushes buffered file output and must outlive the server
            let _log_guard = logging::init(&config.logging)?;
            lifecycle::run(config).await?;
        }
        Commands::InitConfig => {
            commands::init_config(&cli.config).await?;
        }
        Commands::User(cmd) => {
            logging::init_cli()?;
            commands::user::handle(&cli.config, cmd).await?;
        }
        Commands::Key(cmd) => {
            logging::init_cli()?;
            commands::key::handle(&cli.config, cmd).await?;
        }
    }

    Ok(())
}

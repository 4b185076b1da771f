use anyhow::{Context, Result};
use burrow_core::{DrainOutcome, ServerConfig};
use burrow_db::Database;
use burrow_http::HttpServer;
use burrow_sftp::{AuthorizationSnapshot, DirectoryJail, SshListener, load_host_key, ssh_config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Start both listeners and run until a shutdown signal has been handled.
///
/// Startup is all-or-nothing: a bad configuration, an unusable host key, an
/// unreachable database or a failed bind aborts before anything is served.
pub async fn run(config: ServerConfig) -> Result<()> {
    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Burrow"
    );

    config.validate().context("Invalid configuration")?;

    let host_key = load_host_key(&config.host_key_path)
        .await
        .context("Failed to load host key")?;

    let db = Arc::new(
        Database::new(&config.database_path)
            .await
            .context("Failed to open database")?,
    );

    let credentials = db
        .list_all_credentials()
        .await
        .context("Failed to load credentials")?;
    let snapshot = Arc::new(AuthorizationSnapshot::from_credentials(&credentials));
    info!(
        event = "credentials_loaded",
        users = snapshot.user_count(),
        keys = snapshot.key_count(),
        "Authorization snapshot built"
    );

    let ssh_addr = SocketAddr::new(config.bind_address, config.ssh_port);
    let ssh_tcp = TcpListener::bind(ssh_addr)
        .await
        .with_context(|| format!("Failed to bind SSH listener on {ssh_addr}"))?;

    let api_addr = SocketAddr::new(config.api_bind_address, config.api_port);
    let api_tcp = TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind admin API on {api_addr}"))?;

    info!(
        event = "server_configuration",
        ssh_address = %ssh_addr,
        api_address = %api_addr,
        users_dir = ?config.users_dir,
        shutdown_grace_secs = config.shutdown_grace_secs,
        max_auth_attempts = config.max_auth_attempts,
        "Configuration applied"
    );

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let jail = Arc::new(DirectoryJail::new(&config.users_dir));
    let ssh = SshListener::new(ssh_config(&config, host_key), snapshot, jail, grace);
    let http = HttpServer::new(Arc::clone(&db), config);

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(watch_signals(shutdown.clone()));

    let (ssh_outcome, http_result) = drain_together(
        &shutdown,
        ssh.serve(ssh_tcp, shutdown.clone()),
        http.serve(api_tcp, shutdown.clone()),
    )
    .await;
    signals.abort();

    report("ssh", ssh_outcome);
    let http_outcome = http_result.context("Admin API failed")?;
    report("api", http_outcome);

    db.close().await;
    info!(event = "server_stopped", "Burrow stopped");

    Ok(())
}

/// Run both listeners to completion. Whichever way the API side ends, the
/// shared token is cancelled so the SSH side drains too.
async fn drain_together<S, H>(
    shutdown: &CancellationToken,
    ssh: S,
    http: H,
) -> (DrainOutcome, burrow_core::Result<DrainOutcome>)
where
    S: Future<Output = DrainOutcome>,
    H: Future<Output = burrow_core::Result<DrainOutcome>>,
{
    tokio::join!(ssh, async {
        let result = http.await;
        shutdown.cancel();
        result
    })
}

fn report(listener: &str, outcome: DrainOutcome) {
    match outcome {
        DrainOutcome::Drained => info!(listener, event = "drained", "Listener drained"),
        DrainOutcome::TimedOut => warn!(
            listener,
            event = "drain_timed_out",
            "Grace period expired; remaining connections were closed"
        ),
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!(event = "shutdown_signal", signal = "SIGINT", "Shutting down"),
        () = terminate => info!(event = "shutdown_signal", signal = "SIGTERM", "Shutting down"),
    }

    shutdown.cancel();
}

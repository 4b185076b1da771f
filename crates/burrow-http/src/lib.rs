pub mod api;
pub mod auth;

use axum::{
    Router, middleware,
    routing::{delete, get},
};
use burrow_core::{BurrowError, DrainOutcome, Result, ServerConfig};
use burrow_db::Database;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<ServerConfig>,
}

pub struct HttpServer {
    db: Arc<Database>,
    config: Arc<ServerConfig>,
    grace: Duration,
}

impl HttpServer {
    /// In-flight requests get `shutdown_grace_secs` to finish after shutdown
    pub fn new(db: Arc<Database>, config: ServerConfig) -> Self {
        let grace = Duration::from_secs(config.shutdown_grace_secs);
        Self {
            db,
            config: Arc::new(config),
            grace,
        }
    }

    /// Serve the admin API until `shutdown` fires, then let in-flight
    /// requests finish for at most the grace period.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<DrainOutcome> {
        if let Ok(addr) = listener.local_addr() {
            info!("Admin API listening on http://{}", addr);
        }

        let app = self.create_router();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                result.map_err(|e| BurrowError::Http(e.to_string()))?;
                return Ok(DrainOutcome::Drained);
            }
            () = shutdown.cancelled() => {}
        }

        info!(grace_secs = self.grace.as_secs(), "Admin API draining");
        match tokio::time::timeout(self.grace, &mut server).await {
            Ok(result) => {
                result.map_err(|e| BurrowError::Http(e.to_string()))?;
                Ok(DrainOutcome::Drained)
            }
            Err(_) => {
                warn!("Admin API requests still in flight after grace period");
                Ok(DrainOutcome::TimedOut)
            }
        }
    }

    pub fn create_router(&self) -> Router {
        create_router(AppState {
            db: Arc::clone(&self.db),
            config: Arc::clone(&self.config),
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(api::list_users).post(api::create_user))
        .route("/users/{username}", delete(api::delete_user))
        .route(
            "/users/{username}/credentials",
            get(api::list_credentials).post(api::create_credential),
        )
        .route(
            "/users/{username}/credentials/{credential_id}",
            delete(api::delete_credential),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_admin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

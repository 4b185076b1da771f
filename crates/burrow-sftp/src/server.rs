//! SSH listener and per-connection handler
//!
//! Each accepted TCP connection runs as its own task tracked by a
//! [`TaskTracker`]. On shutdown the accept loop stops, sessions get the
//! grace period to finish, and whatever remains is disconnected.

use burrow_core::{DrainOutcome, ServerConfig};
use russh::keys::{PrivateKey, PublicKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Disconnect, MethodKind, MethodSet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{decide, AuthorizationSnapshot, Decision};
use crate::jail::DirectoryJail;
use crate::router::SessionRouter;
use crate::sftp::JailedSftp;
use crate::{Error, Result};

/// Time a force-closed session gets to flush its disconnect message
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Load the server identity key
///
/// # Errors
///
/// Returns `Error::HostKey` if the file is unreadable or not an OpenSSH
/// private key, and `Error::EncryptedHostKey` if it is passphrase protected.
pub async fn load_host_key(path: &Path) -> Result<PrivateKey> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::HostKey(format!("cannot read {}: {e}", path.display())))?;

    let key = PrivateKey::from_openssh(&data)
        .map_err(|e| Error::HostKey(format!("cannot parse {}: {e}", path.display())))?;

    if key.is_encrypted() {
        return Err(Error::EncryptedHostKey(path.to_path_buf()));
    }

    info!(
        path = %path.display(),
        algorithm = %key.algorithm(),
        "Host key loaded"
    );
    Ok(key)
}

/// Public key is the only method ever advertised
fn publickey_only() -> MethodSet {
    let mut methods = MethodSet::empty();
    methods.push(MethodKind::PublicKey);
    methods
}

/// Every rejection has this exact shape, whatever the reason
fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: Some(publickey_only()),
        partial_success: false,
    }
}

/// Build the russh server configuration
///
/// `auth_rejection_time` is applied to every rejected attempt, so an unknown
/// user and a wrong key take the same time to fail.
pub fn ssh_config(settings: &ServerConfig, host_key: PrivateKey) -> russh::server::Config {
    russh::server::Config {
        inactivity_timeout: Some(Duration::from_secs(settings.inactivity_timeout_secs)),
        auth_rejection_time: Duration::from_secs(settings.auth_rejection_time_secs),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: settings.max_auth_attempts,
        methods: publickey_only(),
        keys: vec![host_key],
        ..Default::default()
    }
}

/// SSH accept loop with a bounded drain on shutdown
///
/// Holds what every connection shares: the russh configuration, the
/// authorization snapshot and the directory jail.
pub struct SshListener {
    config: Arc<russh::server::Config>,
    snapshot: Arc<AuthorizationSnapshot>,
    jail: Arc<DirectoryJail>,
    grace: Duration,
}

impl SshListener {
    /// `grace` bounds how long in-flight sessions may run after shutdown
    pub fn new(
        config: russh::server::Config,
        snapshot: Arc<AuthorizationSnapshot>,
        jail: Arc<DirectoryJail>,
        grace: Duration,
    ) -> Self {
        Self {
            config: Arc::new(config),
            snapshot,
            jail,
            grace,
        }
    }

    /// Accept connections until `shutdown` fires, then drain
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> DrainOutcome {
        let tracker = TaskTracker::new();
        let force = CancellationToken::new();

        info!(
            event = "ssh_listening",
            address = ?listener.local_addr().ok(),
            users = self.snapshot.user_count(),
            keys = self.snapshot.key_count(),
            users_dir = %self.jail.base().display(),
            "SSH listener started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept SSH connection");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };

                    let handler = SessionHandler::new(
                        peer,
                        Arc::clone(&self.snapshot),
                        SessionRouter::new(Arc::clone(&self.jail)),
                    );
                    tracker.spawn(run_connection(
                        Arc::clone(&self.config),
                        stream,
                        handler,
                        force.clone(),
                    ));
                }
            }
        }

        // Stop accepting before waiting on in-flight sessions
        drop(listener);
        tracker.close();

        info!(
            event = "ssh_draining",
            active_sessions = tracker.len(),
            grace_secs = self.grace.as_secs(),
            "SSH listener stopped accepting, draining sessions"
        );

        if tokio::time::timeout(self.grace, tracker.wait()).await.is_ok() {
            info!(event = "ssh_drained", "All SSH sessions finished");
            return DrainOutcome::Drained;
        }

        warn!(
            event = "shutdown_timeout",
            remaining_sessions = tracker.len(),
            "SSH sessions still active after grace period, disconnecting"
        );
        force.cancel();

        if tokio::time::timeout(FORCE_CLOSE_WAIT, tracker.wait()).await.is_err() {
            warn!(
                remaining_sessions = tracker.len(),
                "Some SSH sessions did not close after disconnect"
            );
        }

        DrainOutcome::TimedOut
    }
}

async fn run_connection(
    config: Arc<russh::server::Config>,
    stream: TcpStream,
    handler: SessionHandler,
    force: CancellationToken,
) {
    let peer = handler.peer;
    let session_id = handler.session_id;
    let _ = stream.set_nodelay(true);

    debug!(%peer, %session_id, "SSH connection accepted");

    let running = tokio::select! {
        result = russh::server::run_stream(config, stream, handler) => match result {
            Ok(running) => running,
            Err(e) => {
                debug!(%peer, %session_id, error = %e, "SSH handshake failed");
                return;
            }
        },
        () = force.cancelled() => {
            debug!(%peer, %session_id, "Connection dropped before handshake completed");
            return;
        }
    };

    let handle = running.handle();
    tokio::pin!(running);

    let result = tokio::select! {
        result = &mut running => result,
        () = force.cancelled() => {
            let _ = handle
                .disconnect(
                    Disconnect::ByApplication,
                    "server shutting down".to_string(),
                    "en".to_string(),
                )
                .await;
            tokio::time::timeout(FORCE_CLOSE_WAIT, &mut running)
                .await
                .unwrap_or(Ok(()))
        }
    };

    match result {
        Ok(()) => debug!(%peer, %session_id, "SSH connection closed"),
        Err(e) => debug!(%peer, %session_id, error = %e, "SSH connection ended with error"),
    }
}

/// Adapter between russh callbacks and the authorization and routing logic
struct SessionHandler {
    peer: SocketAddr,
    session_id: Uuid,
    snapshot: Arc<AuthorizationSnapshot>,
    router: SessionRouter,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SessionHandler {
    fn new(peer: SocketAddr, snapshot: Arc<AuthorizationSnapshot>, router: SessionRouter) -> Self {
        Self {
            peer,
            session_id: Uuid::new_v4(),
            snapshot,
            router,
            channels: HashMap::new(),
        }
    }

    /// Banner, exit status 0, close. Nothing the client sent is executed.
    fn informational(&mut self, channel: ChannelId, session: &mut Session) {
        match self.router.open_informational() {
            Ok(banner) => {
                let _ = session.channel_success(channel);
                let _ = session.data(channel, CryptoVec::from_slice(banner.as_bytes()));
                let _ = session.exit_status_request(channel, 0);
                let _ = session.eof(channel);
                let _ = session.close(channel);
                self.channels.remove(&channel);
            }
            Err(e) => {
                warn!(
                    event = "request_refused",
                    peer = %self.peer,
                    session_id = %self.session_id,
                    error = %e,
                    "Shell request refused"
                );
                let _ = session.channel_failure(channel);
            }
        }
    }
}

impl Handler for SessionHandler {
    type Error = Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth> {
        debug!(user = %user, peer = %self.peer, "Auth none attempt");
        Ok(reject())
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth> {
        warn!(
            event = "auth_password_rejected",
            user = %user,
            peer = %self.peer,
            session_id = %self.session_id,
            "Password authentication is not supported"
        );
        Ok(reject())
    }

    // Key offered without a signature yet; deny here so unauthorized keys
    // never reach the signature check
    async fn auth_publickey_offered(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        match decide(&self.snapshot, user, public_key) {
            Decision::Allow => Ok(Auth::Accept),
            Decision::Deny => {
                debug!(
                    user = %user,
                    peer = %self.peer,
                    key_type = %public_key.algorithm(),
                    "Offered key not authorized"
                );
                Ok(reject())
            }
        }
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        if decide(&self.snapshot, user, public_key) == Decision::Deny {
            let err = Error::AuthenticationDenied(user.to_string());
            warn!(
                event = "auth_failure",
                peer = %self.peer,
                session_id = %self.session_id,
                error = %err,
                "Public key authentication failed"
            );
            return Ok(reject());
        }

        if let Err(e) = self.router.authenticated(user) {
            warn!(session_id = %self.session_id, error = %e, "Unexpected authentication");
            return Ok(reject());
        }

        info!(
            event = "auth_success",
            user = %user,
            peer = %self.peer,
            session_id = %self.session_id,
            key_type = %public_key.algorithm(),
            "Public key authentication succeeded"
        );
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        debug!(session_id = %self.session_id, channel = ?channel.id(), "Session channel opened");
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        self.informational(channel, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        info!(
            event = "exec_refused",
            user = ?self.router.username(),
            session_id = %self.session_id,
            command_len = data.len(),
            "Exec request answered with banner"
        );
        self.informational(channel, session);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        if !self.channels.contains_key(&channel_id) {
            warn!(session_id = %self.session_id, "Subsystem request for unknown channel");
            let _ = session.channel_failure(channel_id);
            return Ok(());
        }

        let root = match self.router.bind_file_transfer(name).await {
            Ok(root) => root,
            Err(e) => {
                warn!(
                    event = "subsystem_refused",
                    subsystem = %name,
                    user = ?self.router.username(),
                    session_id = %self.session_id,
                    security = e.is_security_event(),
                    error = %e,
                    "Subsystem request refused"
                );
                let _ = session.channel_failure(channel_id);

                // A subsystem that cannot be confined ends the session
                if matches!(e, Error::Jail(_) | Error::Io(_)) {
                    self.channels.remove(&channel_id);
                    let _ = session.close(channel_id);
                    self.router.close();
                }
                return Ok(());
            }
        };

        let Some(channel) = self.channels.remove(&channel_id) else {
            let _ = session.channel_failure(channel_id);
            return Ok(());
        };

        let _ = session.channel_success(channel_id);
        let username = self.router.username().unwrap_or_default().to_string();
        russh_sftp::server::run(
            channel.into_stream(),
            JailedSftp::new(root, username, self.session_id),
        )
        .await;
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        self.channels.remove(&channel);
        Ok(())
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        if let Some(user) = self.router.username() {
            info!(
                event = "session_closed",
                user = %user,
                peer = %self.peer,
                session_id = %self.session_id,
                "Session closed"
            );
        }
        self.router.close();
    }
}

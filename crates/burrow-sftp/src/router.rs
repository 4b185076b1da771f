//! Per-connection session state machine
//!
//! `Connected -> Authenticated -> SessionOpen | SubsystemBound -> Closed`
//!
//! Shell and exec requests only ever produce the informational banner. The
//! file transfer subsystem is the single state in which file operations are
//! served.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::jail::DirectoryJail;
use crate::{Error, Result};

/// The only subsystem name this server binds
pub const FILE_TRANSFER_SUBSYSTEM: &str = "sftp";

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticated { username: String },
    SessionOpen { username: String },
    SubsystemBound { username: String, root: PathBuf },
    Closed,
}

impl SessionState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Authenticated { .. } => "Authenticated",
            Self::SessionOpen { .. } => "SessionOpen",
            Self::SubsystemBound { .. } => "SubsystemBound",
            Self::Closed => "Closed",
        }
    }
}

/// Message sent to users who ask for a shell or a command
pub fn informational_banner(username: &str) -> String {
    format!(
        "Hi {username}! You have successfully authenticated, but this server does not provide shell access.\n"
    )
}

/// Session state for one SSH connection
///
/// Owned by the connection's handler; never shared between connections.
pub struct SessionRouter {
    state: SessionState,
    jail: Arc<DirectoryJail>,
}

impl SessionRouter {
    pub fn new(jail: Arc<DirectoryJail>) -> Self {
        Self {
            state: SessionState::Connected,
            jail,
        }
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Authenticated username, if the session has one and is not closed
    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { username }
            | SessionState::SessionOpen { username }
            | SessionState::SubsystemBound { username, .. } => Some(username),
            SessionState::Connected | SessionState::Closed => None,
        }
    }

    /// Record a successful public key check
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the session is `Connected`.
    pub fn authenticated(&mut self, username: &str) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(self.reject("authenticate"));
        }

        self.state = SessionState::Authenticated {
            username: username.to_string(),
        };
        Ok(())
    }

    /// Handle a shell or exec request
    ///
    /// Returns the banner to write before closing the channel. The command a
    /// client may have supplied never reaches this type.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the session is `Authenticated`.
    pub fn open_informational(&mut self) -> Result<String> {
        let SessionState::Authenticated { username } = &self.state else {
            return Err(self.reject("shell"));
        };

        let username = username.clone();
        let banner = informational_banner(&username);
        debug!(user = %username, "Informational session opened");
        self.state = SessionState::SessionOpen { username };
        Ok(banner)
    }

    /// Bind the file transfer subsystem, preparing the user's jail root
    ///
    /// On error the state is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedSubsystem` for any name other than `sftp`,
    /// `Error::InvalidTransition` unless `Authenticated`, or the jail error.
    pub async fn bind_file_transfer(&mut self, subsystem: &str) -> Result<PathBuf> {
        if subsystem != FILE_TRANSFER_SUBSYSTEM {
            return Err(Error::UnsupportedSubsystem(subsystem.to_string()));
        }

        let SessionState::Authenticated { username } = &self.state else {
            return Err(self.reject("subsystem"));
        };

        let username = username.clone();
        let root = self.jail.prepare(&username).await?;

        info!(user = %username, root = %root.display(), "File transfer subsystem bound");
        self.state = SessionState::SubsystemBound {
            username,
            root: root.clone(),
        };
        Ok(root)
    }

    /// Terminal transition on disconnect or shutdown
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn reject(&self, request: &'static str) -> Error {
        Error::InvalidTransition {
            state: self.state.name(),
            request,
        }
    }
}

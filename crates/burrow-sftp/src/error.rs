//! Error types for the SSH listener and the confined SFTP handler
//!
//! Client-facing output never carries the detail held in these variants:
//! SFTP replies only expose a status code and SSH rejections are uniform.

use russh_sftp::protocol::StatusCode;
use russh_sftp::server::StatusReply;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for SSH and SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport level failure reported by russh
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Host key file unreadable or not an OpenSSH private key
    #[error("Host key error: {0}")]
    HostKey(String),

    #[error("Host key is encrypted: {}", .0.display())]
    EncryptedHostKey(PathBuf),

    #[error("Authentication denied for user: {0}")]
    AuthenticationDenied(String),

    /// One stored credential could not be parsed; the rest are still evaluated
    #[error("Stored credential for {username} is unparseable: {reason}")]
    CredentialParse { username: String, reason: String },

    /// Jail root escapes the base directory or could not be created
    #[error("Jail error: {0}")]
    Jail(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// End of file or directory listing; not a failure
    #[error("End of file")]
    Eof,

    #[error("Invalid file handle: {0}")]
    InvalidHandle(String),

    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Unsupported subsystem: {0}")]
    UnsupportedSubsystem(String),

    /// Session request arrived in a state that does not allow it
    #[error("Request '{request}' not allowed in state {state}")]
    InvalidTransition {
        state: &'static str,
        request: &'static str,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error has security implications and should be logged at warn
    pub const fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationDenied(_)
                | Self::PermissionDenied(_)
                | Self::Jail(_)
                | Self::InvalidTransition { .. }
        )
    }

    /// Map onto the SFTP v3 status code sent back to the client
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
                std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                _ => StatusCode::Failure,
            },
            Self::Eof => StatusCode::Eof,
            Self::PermissionDenied(_) | Self::Jail(_) => StatusCode::PermissionDenied,
            Self::InvalidHandle(_) => StatusCode::BadMessage,
            Self::NotSupported(_) => StatusCode::OpUnsupported,
            _ => StatusCode::Failure,
        }
    }

    /// Get an error message safe to show a remote peer
    pub fn sanitized_message(&self) -> String {
        match self {
            // Don't reveal why authentication failed
            Self::AuthenticationDenied(_) => "Authentication failed".to_string(),
            Self::PermissionDenied(_) | Self::Jail(_) => "Permission denied".to_string(),
            Self::HostKey(_) | Self::EncryptedHostKey(_) => {
                "Server configuration error".to_string()
            }
            Self::Eof => "End of file".to_string(),
            Self::UnsupportedSubsystem(_) | Self::InvalidTransition { .. } => {
                "Request refused".to_string()
            }
            _ => "Failure".to_string(),
        }
    }
}

impl From<Error> for StatusCode {
    fn from(err: Error) -> Self {
        err.to_status_code()
    }
}

/// SFTP error reply: status code plus the sanitized message, never the detail
impl From<Error> for StatusReply {
    fn from(err: Error) -> Self {
        err.to_status_code().with_message(err.sanitized_message())
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Self::Ssh(err.to_string())
    }
}

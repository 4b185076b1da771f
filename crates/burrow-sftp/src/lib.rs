//! # Burrow SFTP
//!
//! SSH listener that grants public-key authenticated users a shell-less,
//! SFTP-only session confined to their own directory.
//!
//! - [`auth`]: immutable authorization snapshot and the allow/deny decision
//! - [`router`]: per-connection session state machine
//! - [`jail`]: per-user root directory resolution and creation
//! - [`sftp`]: SFTP v3 file handler scoped to the jail root
//! - [`server`]: russh handler, host key loading, listener with drain

pub mod auth;
pub mod error;
pub mod jail;
pub mod router;
pub mod server;
pub mod sftp;

pub use auth::{decide, AuthorizationSnapshot, Decision};
pub use error::{Error, Result};
pub use jail::DirectoryJail;
pub use router::{SessionRouter, SessionState, FILE_TRANSFER_SUBSYSTEM};
pub use server::{load_host_key, ssh_config, SshListener};
pub use sftp::JailedSftp;

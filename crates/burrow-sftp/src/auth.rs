//! Public key authorization
//!
//! The [`AuthorizationSnapshot`] is built once at startup from the stored
//! credentials and shared read-only between every connection. Credential
//! changes made afterwards are only picked up on restart.

use burrow_core::{keys_equal, parse_public_key, UserCredential};
use russh::keys::PublicKey;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::Error;

/// Immutable username to ordered key list mapping
#[derive(Debug, Default)]
pub struct AuthorizationSnapshot {
    keys: HashMap<String, Vec<String>>,
}

impl AuthorizationSnapshot {
    /// Build from `(username, raw public key)` pairs, keeping per-user order
    pub fn from_entries<I, U, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (U, K)>,
        U: Into<String>,
        K: Into<String>,
    {
        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for (username, key) in entries {
            keys.entry(username.into()).or_default().push(key.into());
        }
        Self { keys }
    }

    pub fn from_credentials(credentials: &[UserCredential]) -> Self {
        Self::from_entries(
            credentials
                .iter()
                .map(|c| (c.username.as_str(), c.public_key.as_str())),
        )
    }

    /// Stored keys for a user, in insertion order
    pub fn keys_for(&self, username: &str) -> Option<&[String]> {
        self.keys.get(username).map(Vec::as_slice)
    }

    pub fn user_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_count(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }
}

/// Outcome of a single authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decide whether `candidate` authorizes `username`
///
/// Stored keys are parsed one at a time; an unparseable entry is logged and
/// skipped without affecting the others. The first exact key match allows.
pub fn decide(snapshot: &AuthorizationSnapshot, username: &str, candidate: &PublicKey) -> Decision {
    let Some(stored) = snapshot.keys_for(username) else {
        debug!(user = %username, "No credentials for user");
        return Decision::Deny;
    };

    for (index, raw) in stored.iter().enumerate() {
        let parsed = match parse_public_key(raw) {
            Ok(key) => key,
            Err(e) => {
                let err = Error::CredentialParse {
                    username: username.to_string(),
                    reason: e.to_string(),
                };
                warn!(
                    event = "credential_parse_failed",
                    user = %username,
                    index,
                    error = %err,
                    "Skipping unparseable stored credential"
                );
                continue;
            }
        };

        if keys_equal(&parsed, candidate) {
            return Decision::Allow;
        }
    }

    Decision::Deny
}

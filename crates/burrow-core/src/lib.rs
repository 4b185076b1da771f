//! Shared types, configuration and errors for the Burrow file server

pub mod error;
pub mod keys;
pub mod types;

pub use error::{BurrowError, Result};
pub use keys::{keys_equal, parse_public_key, validate_username};
pub use types::{DrainOutcome, LogFormat, LoggingConfig, ServerConfig, User, UserCredential};

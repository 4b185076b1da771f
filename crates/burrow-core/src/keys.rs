//! Public key and username helpers shared by the SSH listener, the API and the CLI

use russh::keys::PublicKey;

use crate::{BurrowError, Result};

/// Longest username accepted for new accounts
pub const MAX_USERNAME_LEN: usize = 64;

/// Parse one OpenSSH `authorized_keys` style line (`<type> <base64> [comment]`)
///
/// # Errors
///
/// Returns `BurrowError::InvalidPublicKey` for empty input or anything
/// that is not a supported OpenSSH public key.
pub fn parse_public_key(line: &str) -> Result<PublicKey> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(BurrowError::InvalidPublicKey("empty key".to_string()));
    }

    PublicKey::from_openssh(trimmed).map_err(|e| BurrowError::InvalidPublicKey(e.to_string()))
}

/// Exact key-material equality; comments are ignored
pub fn keys_equal(a: &PublicKey, b: &PublicKey) -> bool {
    a.key_data() == b.key_data()
}

/// Validate a username for a new account
///
/// Usernames become directory names, so only a conservative character set
/// is allowed.
///
/// # Errors
///
/// Returns `BurrowError::InvalidUsername` describing the first violation.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(BurrowError::InvalidUsername("username is empty".to_string()));
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(BurrowError::InvalidUsername(format!(
            "username longer than {MAX_USERNAME_LEN} characters"
        )));
    }

    if username.starts_with('.') || username.starts_with('-') {
        return Err(BurrowError::InvalidUsername(
            "username must not start with '.' or '-'".to_string(),
        ));
    }

    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(BurrowError::InvalidUsername(format!(
            "username contains invalid character {c:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHuavlA1VzaSF4DgJ5jt4yiLkW6jS9WQ5fzat3aX3Xe4 alice@laptop";
    const KEY_B: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAINenIdFbvcPnhJ4Oyx0jcOSbEFJO3TSXVjL8Oz3S/6QN alice@phone";

    #[test]
    fn test_parse_valid_key() {
        assert!(parse_public_key(KEY_A).is_ok());
        assert!(parse_public_key(&format!("  {KEY_A}\n")).is_ok());
    }

    #[test]
    fn test_parse_invalid_key() {
        assert!(parse_public_key("").is_err());
        assert!(parse_public_key("invalid").is_err());
        assert!(parse_public_key("ssh-ed25519 not-base64!!").is_err());
    }

    #[test]
    fn test_keys_equal_ignores_comment() {
        let with_comment = parse_public_key(KEY_A).unwrap();
        let without_comment = parse_public_key(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHuavlA1VzaSF4DgJ5jt4yiLkW6jS9WQ5fzat3aX3Xe4",
        )
        .unwrap();
        let other = parse_public_key(KEY_B).unwrap();

        assert!(keys_equal(&with_comment, &without_comment));
        assert!(!keys_equal(&with_comment, &other));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob.smith_2-x").is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username("..").is_err());
        assert!(validate_username("../etc").is_err());
        assert!(validate_username("a/b").is_err());
        assert!(validate_username("-rf").is_err());
        assert!(validate_username("caf\u{e9}").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
    }
}

//! Session state machine tests

use burrow_sftp::router::informational_banner;
use burrow_sftp::{DirectoryJail, Error, SessionRouter, SessionState, FILE_TRANSFER_SUBSYSTEM};
use std::sync::Arc;
use tempfile::TempDir;

fn router(base: &TempDir) -> SessionRouter {
    SessionRouter::new(Arc::new(DirectoryJail::new(base.path())))
}

#[tokio::test]
async fn test_sftp_binds_to_user_root() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);

    router.authenticated("alice").unwrap();
    let root = router.bind_file_transfer(FILE_TRANSFER_SUBSYSTEM).await.unwrap();

    assert_eq!(root, std::fs::canonicalize(base.path()).unwrap().join("alice"));
    assert_eq!(
        router.state(),
        &SessionState::SubsystemBound {
            username: "alice".to_string(),
            root,
        }
    );
}

#[test]
fn test_shell_gets_banner_and_session_open() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);

    router.authenticated("alice").unwrap();
    let banner = router.open_informational().unwrap();

    assert!(banner.starts_with("Hi alice!"));
    assert!(banner.contains("does not provide shell access"));
    assert_eq!(
        router.state(),
        &SessionState::SessionOpen {
            username: "alice".to_string()
        }
    );
}

#[test]
fn test_banner_is_literal_text() {
    let banner = informational_banner("$(touch /tmp/pwned)");
    assert_eq!(
        banner,
        "Hi $(touch /tmp/pwned)! You have successfully authenticated, but this server does not provide shell access.\n"
    );
}

#[tokio::test]
async fn test_requests_before_authentication_rejected() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);

    assert!(matches!(
        router.open_informational(),
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        router.bind_file_transfer(FILE_TRANSFER_SUBSYSTEM).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert_eq!(router.state(), &SessionState::Connected);
}

#[tokio::test]
async fn test_unknown_subsystem_leaves_state_unchanged() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);
    router.authenticated("alice").unwrap();

    let result = router.bind_file_transfer("netconf").await;

    assert!(matches!(result, Err(Error::UnsupportedSubsystem(_))));
    assert_eq!(
        router.state(),
        &SessionState::Authenticated {
            username: "alice".to_string()
        }
    );
}

#[tokio::test]
async fn test_no_second_request_after_session_open() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);
    router.authenticated("alice").unwrap();
    router.open_informational().unwrap();

    assert!(router.open_informational().is_err());
    assert!(router.bind_file_transfer(FILE_TRANSFER_SUBSYSTEM).await.is_err());
}

#[tokio::test]
async fn test_jail_failure_keeps_session_authenticated() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);
    router.authenticated("..").unwrap();

    let result = router.bind_file_transfer(FILE_TRANSFER_SUBSYSTEM).await;

    assert!(matches!(result, Err(Error::Jail(_))));
    assert_eq!(router.state().name(), "Authenticated");
}

#[test]
fn test_close_is_terminal() {
    let base = TempDir::new().unwrap();
    let mut router = router(&base);
    router.authenticated("alice").unwrap();

    router.close();

    assert_eq!(router.state(), &SessionState::Closed);
    assert!(router.username().is_none());
    assert!(router.authenticated("alice").is_err());
}

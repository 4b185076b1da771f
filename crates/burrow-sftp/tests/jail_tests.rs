//! Directory jail tests: traversal rejection, lazy creation, concurrency

use burrow_sftp::{DirectoryJail, Error};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_prepare_creates_root_under_base() {
    let base = TempDir::new().unwrap();
    let jail = DirectoryJail::new(base.path());

    let root = jail.prepare("alice").await.unwrap();

    assert_eq!(jail.base(), base.path());
    assert!(root.is_dir());
    assert_eq!(root, std::fs::canonicalize(base.path()).unwrap().join("alice"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_prepare_uses_private_mode() {
    use std::os::unix::fs::PermissionsExt;

    let base = TempDir::new().unwrap();
    let jail = DirectoryJail::new(base.path());

    let root = jail.prepare("alice").await.unwrap();
    let mode = std::fs::metadata(&root).unwrap().permissions().mode() & 0o777;

    // umask can only remove bits
    assert_eq!(mode & 0o077, 0);
}

#[tokio::test]
async fn test_prepare_existing_root_succeeds() {
    let base = TempDir::new().unwrap();
    std::fs::create_dir(base.path().join("alice")).unwrap();
    std::fs::write(base.path().join("alice/keep.txt"), b"data").unwrap();

    let jail = DirectoryJail::new(base.path());
    let root = jail.prepare("alice").await.unwrap();

    assert_eq!(std::fs::read(root.join("keep.txt")).unwrap(), b"data");
}

#[tokio::test]
async fn test_traversal_usernames_rejected_and_nothing_created() {
    let outer = TempDir::new().unwrap();
    let base = outer.path().join("users");
    std::fs::create_dir(&base).unwrap();
    let jail = DirectoryJail::new(&base);

    for name in ["..", "../escaped", "a/../../escaped", "/tmp/abs", "", "."] {
        let result = jail.prepare(name).await;
        assert!(matches!(result, Err(Error::Jail(_))), "{name:?} must be rejected");
    }

    assert!(!outer.path().join("escaped").exists());
}

#[tokio::test]
async fn test_concurrent_first_sessions_both_succeed() {
    let base = TempDir::new().unwrap();
    let jail = Arc::new(DirectoryJail::new(base.path()));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let jail = Arc::clone(&jail);
        tasks.push(tokio::spawn(async move { jail.prepare("newcomer").await }));
    }

    let mut roots = Vec::new();
    for task in tasks {
        roots.push(task.await.unwrap().unwrap());
    }

    assert!(roots.windows(2).all(|w| w[0] == w[1]));
    assert!(roots[0].is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_rejected() {
    let base = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    std::os::unix::fs::symlink(outside.path(), base.path().join("eve")).unwrap();

    let jail = DirectoryJail::new(base.path());

    assert!(matches!(jail.prepare("eve").await, Err(Error::Jail(_))));
}

#[tokio::test]
async fn test_file_in_place_of_root_rejected() {
    let base = TempDir::new().unwrap();
    std::fs::write(base.path().join("alice"), b"not a dir").unwrap();

    let jail = DirectoryJail::new(base.path());

    assert!(jail.prepare("alice").await.is_err());
}

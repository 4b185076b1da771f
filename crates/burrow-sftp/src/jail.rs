//! Per-user directory confinement
//!
//! Every file transfer session is rooted at `base/username`. The root is
//! computed lexically, must be a strict descendant of the base directory,
//! and is created on first use.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Lexically normalize a path: `.` is dropped and `..` pops the previous component
///
/// Does not touch the filesystem, so symlinks are not resolved here.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the filesystem root stays at the root
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    out.iter().collect()
}

/// Maps usernames to per-user root directories below a base directory
///
/// Shared between sessions behind an `Arc`; it holds no mutable state.
#[derive(Debug, Clone)]
pub struct DirectoryJail {
    base: PathBuf,
}

impl DirectoryJail {
    /// The base is normalized lexically; it is canonicalized on each `prepare`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: normalize(&base.into()),
        }
    }

    /// Normalized base directory holding the per-user roots
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Compute the jail root for `username` without touching the filesystem
    ///
    /// # Errors
    ///
    /// Returns `Error::Jail` for an empty or absolute username, or one whose
    /// root would not be a strict descendant of the base directory.
    pub fn resolve(&self, username: &str) -> Result<PathBuf> {
        if username.is_empty() {
            return Err(Error::Jail("empty username".to_string()));
        }

        if username.contains('\0') {
            return Err(Error::Jail("username contains NUL".to_string()));
        }

        let requested = Path::new(username);
        if requested.is_absolute() || requested.has_root() {
            return Err(Error::Jail(format!("absolute username rejected: {username:?}")));
        }

        let root = normalize(&self.base.join(requested));
        if root == self.base || !root.starts_with(&self.base) {
            return Err(Error::Jail(format!(
                "root for {username:?} escapes {}",
                self.base.display()
            )));
        }

        Ok(root)
    }

    /// Resolve the jail root and create it if needed
    ///
    /// Creation tolerates a concurrent creator. The returned path is
    /// canonical and has been checked against the canonical base, so a
    /// symlink planted inside the base cannot redirect the session.
    ///
    /// # Errors
    ///
    /// Returns `Error::Jail` if the root escapes the base directory, cannot
    /// be created, or is not a directory.
    pub async fn prepare(&self, username: &str) -> Result<PathBuf> {
        let root = self.resolve(username)?;

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);

        match builder.create(&root).await {
            Ok(()) => debug!(user = %username, root = %root.display(), "Jail root ready"),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => {
                warn!(user = %username, error = %e, "Failed to create jail root");
                return Err(Error::Jail(format!(
                    "cannot create {}: {e}",
                    root.display()
                )));
            }
        }

        let canonical_base = fs::canonicalize(&self.base)
            .await
            .map_err(|e| Error::Jail(format!("cannot resolve base directory: {e}")))?;
        let canonical_root = fs::canonicalize(&root)
            .await
            .map_err(|e| Error::Jail(format!("cannot resolve {}: {e}", root.display())))?;

        if canonical_root == canonical_base || !canonical_root.starts_with(&canonical_base) {
            warn!(
                event = "jail_escape",
                user = %username,
                root = %canonical_root.display(),
                "Jail root resolves outside the users directory"
            );
            return Err(Error::Jail(format!(
                "{} resolves outside {}",
                root.display(),
                canonical_base.display()
            )));
        }

        let metadata = fs::metadata(&canonical_root).await?;
        if !metadata.is_dir() {
            return Err(Error::Jail(format!("{} is not a directory", root.display())));
        }

        info!(user = %username, root = %canonical_root.display(), "Jail root prepared");
        Ok(canonical_root)
    }
}

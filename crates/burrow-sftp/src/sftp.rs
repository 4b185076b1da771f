//! SFTP v3 file handler confined to a jail root
//!
//! Client paths are virtual: `/` is the jail root, relative paths are
//! relative to it, and `..` may never climb above it. Wire encoding is done
//! by `russh-sftp`; this module only decides what each request does.

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Open file and directory handles allowed per session
pub const MAX_OPEN_HANDLES: usize = 1024;

/// Largest chunk returned for a single read request
const MAX_READ_LEN: u32 = 256 * 1024;

enum OpenHandle {
    File { file: fs::File, path: PathBuf },
    // Entries are returned in one batch, then EOF
    Dir { path: PathBuf, pending: Option<Vec<File>> },
}

/// Per-session SFTP handler serving one user's jail root
///
/// Holds the open file and directory handles for the session. Every client
/// path is resolved against `root` and checked to stay inside it, including
/// through symlinks, before the filesystem is touched.
pub struct JailedSftp {
    root: PathBuf,
    username: String,
    session_id: Uuid,
    handles: HashMap<String, OpenHandle>,
    next_handle: u64,
}

impl JailedSftp {
    /// `root` must already be canonical, as returned by `DirectoryJail::prepare`
    pub fn new(root: PathBuf, username: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            root,
            username: username.into(),
            session_id,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Canonical directory this session is confined to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split a client path into normalized components below the root
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` when `..` would climb above the root
    /// or the path contains NUL.
    pub fn virtual_components(path: &str) -> Result<Vec<String>> {
        if path.contains('\0') {
            return Err(Error::PermissionDenied("path contains NUL".to_string()));
        }

        let mut parts: Vec<String> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(Error::PermissionDenied(format!(
                            "{path:?} climbs above the root"
                        )));
                    }
                }
                other => parts.push(other.to_string()),
            }
        }

        Ok(parts)
    }

    /// Map a client path onto the real filesystem
    ///
    /// # Errors
    ///
    /// Fails if the path escapes the root lexically or, through a symlink,
    /// once resolved against the filesystem.
    pub async fn resolve(&self, path: &str) -> Result<PathBuf> {
        let parts = Self::virtual_components(path)?;
        let real = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));
        self.ensure_contained(&real).await?;
        Ok(real)
    }

    /// Canonicalize the deepest existing ancestor and check it stays in the root
    async fn ensure_contained(&self, path: &Path) -> Result<()> {
        let mut probe = path.to_path_buf();
        loop {
            match fs::canonicalize(&probe).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(real) => {
                    warn!(
                        event = "jail_escape",
                        user = %self.username,
                        session_id = %self.session_id,
                        target = %real.display(),
                        "Path resolves outside the jail root"
                    );
                    return Err(Error::PermissionDenied("path escapes root".to_string()));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if !probe.pop() {
                        return Err(Error::PermissionDenied("no existing ancestor".to_string()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn insert_handle(&mut self, handle: OpenHandle) -> Result<String> {
        if self.handles.len() >= MAX_OPEN_HANDLES {
            return Err(Error::ResourceExhaustion(format!(
                "{MAX_OPEN_HANDLES} handles already open"
            )));
        }

        let id = self.next_handle.to_string();
        self.next_handle += 1;
        self.handles.insert(id.clone(), handle);
        Ok(id)
    }

    fn file_mut(&mut self, handle: &str) -> Result<&mut fs::File> {
        match self.handles.get_mut(handle) {
            Some(OpenHandle::File { file, .. }) => Ok(file),
            _ => Err(Error::InvalidHandle(handle.to_string())),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }
}

fn ok_status(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

impl russh_sftp::server::Handler for JailedSftp {
    type Error = Error;

    fn unimplemented(&self) -> Self::Error {
        Error::NotSupported("operation".to_string())
    }

    async fn init(
        &mut self,
        version: u32,
        extensions: HashMap<String, String>,
    ) -> Result<Version> {
        info!(
            user = %self.username,
            session_id = %self.session_id,
            version,
            extensions = extensions.len(),
            "SFTP session initialised"
        );
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle> {
        let path = self.resolve(&filename).await?;
        let options: std::fs::OpenOptions = pflags.into();
        let file = fs::OpenOptions::from(options).open(&path).await?;

        debug!(user = %self.username, path = %filename, "File opened");
        let handle = self.insert_handle(OpenHandle::File { file, path })?;
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status> {
        match self.handles.remove(&handle) {
            Some(OpenHandle::File { mut file, path }) => {
                file.flush().await?;
                debug!(user = %self.username, path = %path.display(), "File closed");
            }
            Some(OpenHandle::Dir { .. }) => {}
            None => return Err(Error::InvalidHandle(handle)),
        }
        Ok(ok_status(id))
    }

    async fn read(&mut self, id: u32, handle: String, offset: u64, len: u32) -> Result<Data> {
        let file = self.file_mut(&handle)?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut data = vec![0u8; len.min(MAX_READ_LEN) as usize];
        let read = file.read(&mut data).await?;
        if read == 0 && !data.is_empty() {
            return Err(Error::Eof);
        }

        data.truncate(read);
        Ok(Data { id, data })
    }

    async fn write(&mut self, id: u32, handle: String, offset: u64, data: Vec<u8>) -> Result<Status> {
        let file = self.file_mut(&handle)?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        Ok(ok_status(id))
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs> {
        let real = self.resolve(&path).await?;
        let metadata = fs::symlink_metadata(&real).await?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs> {
        let metadata = match self.handles.get(&handle) {
            Some(OpenHandle::File { file, .. }) => file.metadata().await?,
            Some(OpenHandle::Dir { path, .. }) => fs::metadata(path).await?,
            None => return Err(Error::InvalidHandle(handle)),
        };
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn setstat(&mut self, id: u32, path: String, _attrs: FileAttributes) -> Result<Status> {
        // Attribute changes are accepted and ignored
        let real = self.resolve(&path).await?;
        fs::metadata(&real).await?;
        Ok(ok_status(id))
    }

    async fn fsetstat(&mut self, id: u32, handle: String, _attrs: FileAttributes) -> Result<Status> {
        if !self.handles.contains_key(&handle) {
            return Err(Error::InvalidHandle(handle));
        }
        Ok(ok_status(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle> {
        let real = self.resolve(&path).await?;
        let mut reader = fs::read_dir(&real).await?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(File::new(name, FileAttributes::from(&metadata)));
        }

        let handle = self.insert_handle(OpenHandle::Dir {
            path: real,
            pending: Some(entries),
        })?;
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name> {
        let Some(OpenHandle::Dir { pending, .. }) = self.handles.get_mut(&handle) else {
            return Err(Error::InvalidHandle(handle));
        };

        match pending.take() {
            Some(files) if !files.is_empty() => Ok(Name { id, files }),
            _ => Err(Error::Eof),
        }
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status> {
        let real = self.resolve(&filename).await?;
        fs::remove_file(&real).await?;
        info!(user = %self.username, path = %filename, "File removed");
        Ok(ok_status(id))
    }

    async fn mkdir(&mut self, id: u32, path: String, _attrs: FileAttributes) -> Result<Status> {
        let real = self.resolve(&path).await?;
        fs::create_dir(&real).await?;
        info!(user = %self.username, path = %path, "Directory created");
        Ok(ok_status(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status> {
        let real = self.resolve(&path).await?;
        if real == self.root {
            return Err(Error::PermissionDenied("cannot remove the root".to_string()));
        }
        fs::remove_dir(&real).await?;
        info!(user = %self.username, path = %path, "Directory removed");
        Ok(ok_status(id))
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name> {
        let parts = Self::virtual_components(&path)?;
        let shown = format!("/{}", parts.join("/"));
        Ok(Name {
            id,
            files: vec![File::dummy(shown)],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs> {
        let real = self.resolve(&path).await?;
        let metadata = fs::metadata(&real).await?;
        Ok(Attrs {
            id,
            attrs: FileAttributes::from(&metadata),
        })
    }

    async fn rename(&mut self, id: u32, oldpath: String, newpath: String) -> Result<Status> {
        let from = self.resolve(&oldpath).await?;
        let to = self.resolve(&newpath).await?;

        if from == self.root || to == self.root {
            return Err(Error::PermissionDenied("cannot rename the root".to_string()));
        }
        // SFTP v3 rename never overwrites
        if fs::try_exists(&to).await? {
            return Err(Error::Other("target exists".to_string()));
        }

        fs::rename(&from, &to).await?;
        info!(user = %self.username, from = %oldpath, to = %newpath, "Path renamed");
        Ok(ok_status(id))
    }
}

impl Drop for JailedSftp {
    fn drop(&mut self) {
        debug!(
            user = %self.username,
            session_id = %self.session_id,
            root = %self.root().display(),
            open_handles = self.handles.len(),
            "SFTP session ended"
        );
    }
}

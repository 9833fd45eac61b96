//! The filesystem abstraction shared by local and remote storage.
//!
//! [`FilesystemProvider`] is the capability set every realm implements;
//! [`Provider`] dispatches to the concrete implementation chosen for a
//! request. Handles returned by `open_for_read` implement [`ReadAt`] and own
//! whatever they need to keep reading (for SFTP, the session itself).

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::AsyncRead;

use super::error::FsError;
use super::local::{LocalHandle, LocalProvider};
use super::path::RelPath;
use super::remote::{RemoteHandle, RemoteProvider};
use super::upload::SavedFile;

/// Attributes of a path, resolved through symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Whether the path is a directory.
    pub is_directory: bool,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl Metadata {
    /// Modification time in whole seconds since the Unix epoch.
    pub fn mtime_secs(&self) -> u64 {
        self.modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Positional reads from an open file.
pub trait ReadAt: Send {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Fewer than `len` bytes are returned only at end of file. Identical
    /// arguments yield identical bytes as long as the file is not modified.
    fn read_at(
        &mut self,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = Result<Bytes, FsError>> + Send;
}

/// Storage operations available in a realm.
///
/// Paths are always relative to the realm root and already validated.
pub trait FilesystemProvider: Send + Sync {
    /// Handle type returned by [`FilesystemProvider::open_for_read`].
    type Handle: ReadAt + 'static;

    /// Stat a path.
    fn stat(&self, path: &RelPath) -> impl Future<Output = Result<Metadata, FsError>> + Send;

    /// Entry names of a directory, in the order the backing store returns them.
    fn list_directory(
        &self,
        path: &RelPath,
    ) -> impl Future<Output = Result<Vec<String>, FsError>> + Send;

    /// Open a regular file for reading.
    fn open_for_read(
        &self,
        path: &RelPath,
    ) -> impl Future<Output = Result<Self::Handle, FsError>> + Send;

    /// Write `source` to `dir/filename`, creating or truncating it.
    ///
    /// `filename` is sanitized before it is joined to `dir`.
    fn save<R>(
        &self,
        dir: &RelPath,
        filename: &str,
        source: R,
    ) -> impl Future<Output = Result<SavedFile, FsError>> + Send
    where
        R: AsyncRead + Unpin + Send;
}

/// The provider selected for one request.
pub enum Provider {
    /// The user's local storage.
    Local(LocalProvider),
    /// A remote host over SFTP.
    Remote(RemoteProvider),
}

impl Provider {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Provider::Local(_) => "local",
            Provider::Remote(_) => "remote",
        }
    }

    /// Release the provider, disconnecting a remote session when nothing
    /// else holds it.
    pub async fn close(self) {
        if let Provider::Remote(remote) = self {
            remote.close().await;
        }
    }
}

impl FilesystemProvider for Provider {
    type Handle = FileHandle;

    async fn stat(&self, path: &RelPath) -> Result<Metadata, FsError> {
        match self {
            Provider::Local(p) => p.stat(path).await,
            Provider::Remote(p) => p.stat(path).await,
        }
    }

    async fn list_directory(&self, path: &RelPath) -> Result<Vec<String>, FsError> {
        match self {
            Provider::Local(p) => p.list_directory(path).await,
            Provider::Remote(p) => p.list_directory(path).await,
        }
    }

    async fn open_for_read(&self, path: &RelPath) -> Result<FileHandle, FsError> {
        match self {
            Provider::Local(p) => p.open_for_read(path).await.map(FileHandle::Local),
            Provider::Remote(p) => p.open_for_read(path).await.map(FileHandle::Remote),
        }
    }

    async fn save<R>(&self, dir: &RelPath, filename: &str, source: R) -> Result<SavedFile, FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self {
            Provider::Local(p) => p.save(dir, filename, source).await,
            Provider::Remote(p) => p.save(dir, filename, source).await,
        }
    }
}

/// An open file from either realm.
pub enum FileHandle {
    /// Local file.
    Local(LocalHandle),
    /// Remote file; keeps its SFTP session alive.
    Remote(RemoteHandle),
}

impl ReadAt for FileHandle {
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes, FsError> {
        match self {
            FileHandle::Local(h) => h.read_at(offset, len).await,
            FileHandle::Remote(h) => h.read_at(offset, len).await,
        }
    }
}

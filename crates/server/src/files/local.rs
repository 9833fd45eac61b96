//! Local storage rooted at a per-user directory.
//!
//! Every path is canonicalized before use and must stay inside the user's
//! canonical root, so a symbolic link cannot be used to reach files outside
//! it. Uploads are written to a temporary file in the destination directory
//! and renamed into place once complete.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use super::error::FsError;
use super::path::RelPath;
use super::provider::{FilesystemProvider, Metadata, ReadAt};
use super::upload::{copy_hashed, partial_upload_name, sanitize_filename, SavedFile};

/// Default upload ceiling (4 GiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Provider for a user's local storage.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    /// Canonical root of the realm.
    root: PathBuf,
    /// Largest accepted upload in bytes.
    max_upload_size: u64,
}

impl LocalProvider {
    /// Open the realm for `user` under `base`, creating it on first access.
    pub async fn for_user(base: &Path, user: &str) -> Result<Self, FsError> {
        if user.is_empty()
            || user == "."
            || user == ".."
            || user.contains('/')
            || user.contains('\\')
            || user.contains('\0')
        {
            return Err(FsError::NotFound(user.to_string()));
        }

        let root = base.join(user);
        fs::create_dir_all(&root)
            .await
            .map_err(|e| FsError::from_io(e, user))?;
        Self::new(&root).await
    }

    /// Use an existing directory as the realm root.
    pub async fn new(root: &Path) -> Result<Self, FsError> {
        let root = fs::canonicalize(root)
            .await
            .map_err(|e| FsError::from_io(e, &root.to_string_lossy()))?;
        debug!(root = %root.display(), "Opened local realm");
        Ok(Self {
            root,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        })
    }

    /// Set the upload ceiling.
    pub fn with_max_upload_size(mut self, limit: u64) -> Self {
        self.max_upload_size = limit;
        self
    }

    /// Canonical realm root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to a canonical physical path inside the root.
    async fn resolve(&self, path: &RelPath) -> Result<PathBuf, FsError> {
        let joined = self.root.join(path.to_path_buf());
        let canonical = fs::canonicalize(&joined)
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?;

        if !canonical.starts_with(&self.root) {
            warn!(
                path = %path,
                target = %canonical.display(),
                "Rejected path resolving outside the realm root"
            );
            return Err(FsError::PathTraversal(path.to_string()));
        }

        Ok(canonical)
    }
}

impl FilesystemProvider for LocalProvider {
    type Handle = LocalHandle;

    async fn stat(&self, path: &RelPath) -> Result<Metadata, FsError> {
        let physical = self.resolve(path).await?;
        let meta = fs::metadata(&physical)
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?;

        Ok(Metadata {
            is_directory: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().map_err(FsError::Io)?,
        })
    }

    async fn list_directory(&self, path: &RelPath) -> Result<Vec<String>, FsError> {
        let physical = self.resolve(path).await?;
        let mut dir = fs::read_dir(&physical)
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?;

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?
        {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!(path = %path, name = ?raw, "Skipping non UTF-8 entry name"),
            }
        }
        Ok(names)
    }

    async fn open_for_read(&self, path: &RelPath) -> Result<LocalHandle, FsError> {
        let physical = self.resolve(path).await?;
        let meta = fs::metadata(&physical)
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?;
        if meta.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }

        let file = File::open(&physical)
            .await
            .map_err(|e| FsError::from_io(e, &path.to_string()))?;
        Ok(LocalHandle { file, position: 0 })
    }

    async fn save<R>(&self, dir: &RelPath, filename: &str, mut source: R) -> Result<SavedFile, FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let name = sanitize_filename(filename)?;
        let logical = dir.join(&name)?.to_string();

        let dir_path = self.resolve(dir).await?;
        let dir_meta = fs::metadata(&dir_path)
            .await
            .map_err(|e| FsError::from_io(e, &dir.to_string()))?;
        if !dir_meta.is_dir() {
            return Err(FsError::NotADirectory(dir.to_string()));
        }

        let destination = dir_path.join(&name);
        if let Ok(existing) = fs::metadata(&destination).await {
            if existing.is_dir() {
                return Err(FsError::IsADirectory(logical));
            }
        }

        let temp_path = dir_path.join(partial_upload_name());
        let mut temp = File::create(&temp_path)
            .await
            .map_err(|e| FsError::from_io(e, &logical))?;

        let copied = match copy_hashed(&mut source, &mut temp, self.max_upload_size, &logical).await {
            Ok(copied) => temp
                .sync_all()
                .await
                .map_err(|e| FsError::from_io(e, &logical))
                .map(|_| copied),
            Err(e) => Err(e),
        };
        drop(temp);

        let (size, sha256) = match copied {
            Ok(copied) => copied,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&temp_path).await {
                    warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial upload");
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp_path, &destination).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial upload");
            }
            return Err(FsError::from_io(e, &logical));
        }

        debug!(path = %logical, size, "Saved upload");
        Ok(SavedFile { name, size, sha256 })
    }
}

/// An open local file.
#[derive(Debug)]
pub struct LocalHandle {
    file: File,
    position: u64,
}

impl ReadAt for LocalHandle {
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes, FsError> {
        if self.position != offset {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.position = offset;
        }

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.position += filled as u64;

        Ok(Bytes::from(buf))
    }
}

//! Upload helpers shared by both providers.
//!
//! File names supplied by clients are reduced to a safe single path
//! component, and bytes are copied with a running SHA-256 and a size ceiling.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::error::FsError;

/// Copy buffer size for uploads.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Prefix of the temporary file an upload is written to before it is renamed.
pub const PARTIAL_UPLOAD_PREFIX: &str = ".upload.";

/// Suffix of the temporary file an upload is written to.
pub const PARTIAL_UPLOAD_SUFFIX: &str = ".part";

/// A fresh temporary name for an in-flight upload.
///
/// The name does not depend on the client's file name, so its length is
/// fixed no matter how long the final name is.
pub fn partial_upload_name() -> String {
    format!("{}{}{}", PARTIAL_UPLOAD_PREFIX, Uuid::new_v4().simple(), PARTIAL_UPLOAD_SUFFIX)
}

/// Whether `name` looks like an in-flight upload.
pub fn is_partial_upload(name: &str) -> bool {
    name.starts_with(PARTIAL_UPLOAD_PREFIX) && name.ends_with(PARTIAL_UPLOAD_SUFFIX)
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Sanitized name the file was stored under.
    pub name: String,
    /// Bytes written.
    pub size: u64,
    /// Hex-encoded SHA-256 of the written bytes.
    pub sha256: String,
}

/// Reduce a client-supplied file name to a single safe path component.
///
/// Path separators become spaces, runs of whitespace become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped, and leading or trailing `.`/`_` are
/// stripped. Returns `InvalidFilename` if nothing is left.
pub fn sanitize_filename(raw: &str) -> Result<String, FsError> {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let name = kept.trim_matches(|c| c == '.' || c == '_');
    if name.is_empty() {
        return Err(FsError::InvalidFilename(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Copy `source` into `sink`, hashing as it goes.
///
/// Fails with `QuotaExceeded` as soon as more than `limit` bytes have been
/// read. The sink is flushed but not closed.
pub async fn copy_hashed<R, W>(
    source: &mut R,
    sink: &mut W,
    limit: u64,
    path: &str,
) -> Result<(u64, String), FsError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| FsError::Transfer(format!("reading upload for {}: {}", path, e)))?;
        if n == 0 {
            break;
        }

        written += n as u64;
        if written > limit {
            return Err(FsError::QuotaExceeded(format!(
                "{} exceeds the {} byte upload limit",
                path, limit
            )));
        }

        hasher.update(&buf[..n]);
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| FsError::from_io(e, path))?;
    }

    sink.flush().await.map_err(|e| FsError::from_io(e, path))?;

    Ok((written, hex::encode(hasher.finalize())))
}

//! Remote storage over SFTP.
//!
//! A [`RemoteProvider`] owns one SSH connection with one SFTP channel, opened
//! for a single request. File handles share the session through an `Arc`, so
//! a download that outlives the provider keeps the connection open until the
//! body is finished or dropped.

use std::io;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use russh::client;
use russh::Disconnect;
use russh_keys::key::PublicKey;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::File as SftpFile;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::error::FsError;
use super::local::DEFAULT_MAX_UPLOAD_SIZE;
use super::path::{RelPath, RemoteHost};
use super::provider::{FilesystemProvider, Metadata, ReadAt};
use super::upload::{copy_hashed, sanitize_filename, SavedFile};
use crate::config::RemoteConfig;

/// SSH client callbacks: trust-on-first-use host key checking.
struct HostKeyVerifier {
    host: String,
    port: u16,
    known_hosts: PathBuf,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match russh_keys::check_known_hosts_path(
            &self.host,
            self.port,
            server_public_key,
            &self.known_hosts,
        ) {
            Ok(true) => Ok(true),
            Ok(false) => {
                info!(
                    host = %self.host,
                    port = self.port,
                    fingerprint = %server_public_key.fingerprint(),
                    "Learning new host key"
                );
                if let Err(e) = russh_keys::learn_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    &self.known_hosts,
                ) {
                    warn!(host = %self.host, error = %e, "Failed to record host key");
                }
                Ok(true)
            }
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "Host key verification failed");
                Ok(false)
            }
        }
    }
}

/// One SSH connection carrying an SFTP channel.
struct RemoteSession {
    sftp: SftpSession,
    ssh: client::Handle<HostKeyVerifier>,
    label: String,
}

impl RemoteSession {
    async fn close(self) {
        if let Err(e) = self.sftp.close().await {
            debug!(host = %self.label, error = %e, "SFTP channel close failed");
        }
        if let Err(e) = self
            .ssh
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.label, error = %e, "SSH disconnect failed");
        }
        debug!(host = %self.label, "Closed remote session");
    }
}

/// Provider for a remote host.
pub struct RemoteProvider {
    session: Arc<RemoteSession>,
    max_upload_size: u64,
}

impl RemoteProvider {
    /// Open an SSH connection to `host` and start the SFTP subsystem.
    pub async fn connect(host: &RemoteHost, config: &RemoteConfig) -> Result<Self, FsError> {
        let port = host.port_or(config.port);
        let label = format!("{}:{}", host.host, port);
        let failed = |what: &str, e: &dyn std::fmt::Display| {
            FsError::ConnectionFailed(format!("{}: {}: {}", label, what, e))
        };

        let key = russh_keys::load_secret_key(&config.identity_file, None)
            .map_err(|e| failed("loading identity", &e))?;

        if let Some(parent) = config.known_hosts.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed("creating known_hosts directory", &e))?;
        }

        let handler = HostKeyVerifier {
            host: host.host.clone(),
            port,
            known_hosts: config.known_hosts.clone(),
        };

        debug!(host = %label, user = %config.username, "Connecting to remote host");
        let ssh_config = Arc::new(client::Config::default());
        let timeout = Duration::from_secs(config.connect_timeout);
        let mut ssh = tokio::time::timeout(
            timeout,
            client::connect(ssh_config, (host.host.as_str(), port), handler),
        )
        .await
        .map_err(|_| failed("connect", &"timed out"))?
        .map_err(|e| failed("connect", &e))?;

        let authenticated = ssh
            .authenticate_publickey(config.username.clone(), Arc::new(key))
            .await
            .map_err(|e| failed("authenticate", &e))?;
        if !authenticated {
            return Err(FsError::PermissionDenied(format!(
                "{}: authentication rejected for {}",
                label, config.username
            )));
        }

        let channel = ssh
            .channel_open_session()
            .await
            .map_err(|e| failed("open channel", &e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| failed("request sftp subsystem", &e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| failed("start sftp", &e))?;

        info!(host = %label, "Remote session established");
        Ok(Self {
            session: Arc::new(RemoteSession { sftp, ssh, label }),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        })
    }

    /// Set the upload ceiling.
    pub fn with_max_upload_size(mut self, limit: u64) -> Self {
        self.max_upload_size = limit;
        self
    }

    /// Disconnect, unless an open file handle still uses the session.
    pub async fn close(self) {
        match Arc::try_unwrap(self.session) {
            Ok(session) => session.close().await,
            Err(shared) => debug!(host = %shared.label, "Remote session still in use by a file handle"),
        }
    }

    fn sftp(&self) -> &SftpSession {
        &self.session.sftp
    }

    fn map_error(&self, err: SftpError, path: &RelPath) -> FsError {
        map_sftp_error(err, &path.to_string(), &self.session.label)
    }
}

impl FilesystemProvider for RemoteProvider {
    type Handle = RemoteHandle;

    async fn stat(&self, path: &RelPath) -> Result<Metadata, FsError> {
        let attrs = self
            .sftp()
            .metadata(path.to_remote())
            .await
            .map_err(|e| self.map_error(e, path))?;
        Ok(to_metadata(attrs.is_dir(), attrs.size, attrs.mtime))
    }

    async fn list_directory(&self, path: &RelPath) -> Result<Vec<String>, FsError> {
        if !self.stat(path).await?.is_directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }

        let entries = self
            .sftp()
            .read_dir(path.to_remote())
            .await
            .map_err(|e| self.map_error(e, path))?;

        Ok(entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn open_for_read(&self, path: &RelPath) -> Result<RemoteHandle, FsError> {
        if self.stat(path).await?.is_directory {
            return Err(FsError::IsADirectory(path.to_string()));
        }

        let file = self
            .sftp()
            .open(path.to_remote())
            .await
            .map_err(|e| self.map_error(e, path))?;

        Ok(RemoteHandle {
            file,
            position: 0,
            path: path.to_string(),
            _session: Arc::clone(&self.session),
        })
    }

    async fn save<R>(&self, dir: &RelPath, filename: &str, mut source: R) -> Result<SavedFile, FsError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let name = sanitize_filename(filename)?;
        let target = dir.join(&name)?;
        let logical = target.to_string();

        if !self.stat(dir).await?.is_directory {
            return Err(FsError::NotADirectory(dir.to_string()));
        }

        let mut file = self
            .sftp()
            .create(target.to_remote())
            .await
            .map_err(|e| self.map_error(e, &target))?;

        let copied = copy_hashed(&mut source, &mut file, self.max_upload_size, &logical).await;
        if let Err(e) = file.shutdown().await {
            debug!(path = %logical, error = %e, "Remote file close failed");
        }

        match copied {
            Ok((size, sha256)) => {
                debug!(host = %self.session.label, path = %logical, size, "Saved upload");
                Ok(SavedFile { name, size, sha256 })
            }
            Err(e) => {
                if let Err(cleanup) = self.sftp().remove_file(target.to_remote()).await {
                    warn!(path = %logical, error = %cleanup, "Failed to remove partial upload");
                }
                Err(e)
            }
        }
    }
}

/// An open remote file. Holds the session open while it lives.
pub struct RemoteHandle {
    file: SftpFile,
    position: u64,
    path: String,
    _session: Arc<RemoteSession>,
}

impl ReadAt for RemoteHandle {
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes, FsError> {
        if self.position != offset {
            self.file
                .seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| FsError::from_io(e, &self.path))?;
            self.position = offset;
        }

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| FsError::from_io(e, &self.path))?;
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

fn to_metadata(is_directory: bool, size: Option<u64>, mtime: Option<u32>) -> Metadata {
    Metadata {
        is_directory,
        size: size.unwrap_or(0),
        modified: mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(u64::from(secs)))
            .unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

/// Map an SFTP error. Status replies keep their meaning; anything else means
/// the session itself is unusable.
fn map_sftp_error(err: SftpError, path: &str, host: &str) -> FsError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => FsError::NotFound(path.to_string()),
            StatusCode::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            StatusCode::NoConnection | StatusCode::ConnectionLost => {
                FsError::ConnectionFailed(format!("{}: {}", host, status.error_message))
            }
            _ => FsError::Io(io::Error::other(format!(
                "{}: {}: {}",
                host, path, status.error_message
            ))),
        },
        other => FsError::ConnectionFailed(format!("{}: {}", host, other)),
    }
}

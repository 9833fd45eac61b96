//! Logical path resolution.
//!
//! A request path is split into a realm (the authenticated user's local root,
//! a remote host, or one of the two virtual indexes) and a path relative to
//! that realm. Relative paths are validated lexically here; they can never
//! contain `..` or absolute components, so joining them to a realm root
//! cannot climb out of it.

use std::fmt;
use std::path::PathBuf;

use super::error::FsError;

/// First path segment that selects the remote realm.
pub const SERVERS_SEGMENT: &str = "servers";

/// A validated path relative to a realm root.
///
/// Empty segments and `.` are dropped; `..` is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelPath {
    segments: Vec<String>,
}

impl RelPath {
    /// The realm root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a `/`-separated relative path.
    pub fn parse(raw: &str) -> Result<Self, FsError> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(FsError::PathTraversal(raw.to_string())),
                s if s.contains('\0') => return Err(FsError::PathTraversal(raw.to_string())),
                s => segments.push(s.to_string()),
            }
        }
        Ok(Self { segments })
    }

    /// Whether this is the realm root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The final segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append a single entry name.
    ///
    /// Names are checked the same way as parsed segments.
    pub fn join(&self, name: &str) -> Result<Self, FsError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(FsError::PathTraversal(name.to_string()));
        }
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Relative filesystem path (empty for the root).
    pub fn to_path_buf(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Path as sent to an SFTP server, relative to the login directory.
    pub fn to_remote(&self) -> String {
        if self.is_root() {
            ".".to_string()
        } else {
            self.segments.join("/")
        }
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Address of a remote host, optionally with an explicit port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteHost {
    /// Host name or IP address.
    pub host: String,
    /// Port, if given in the path.
    pub port: Option<u16>,
}

impl RemoteHost {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    pub fn parse(raw: &str) -> Result<Self, FsError> {
        let not_found = || FsError::NotFound(format!("{}/{}", SERVERS_SEGMENT, raw));

        if raw.is_empty() {
            return Err(not_found());
        }

        if let Some(rest) = raw.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(not_found)?;
            let port = match tail {
                "" => None,
                t => Some(
                    t.strip_prefix(':')
                        .and_then(|p| p.parse().ok())
                        .ok_or_else(not_found)?,
                ),
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match raw.rsplit_once(':') {
            // A bare IPv6 address has several colons and no port.
            Some((host, _)) if host.contains(':') => Ok(Self {
                host: raw.to_string(),
                port: None,
            }),
            Some((host, port)) => {
                let port = port.parse().map_err(|_| not_found())?;
                Ok(Self {
                    host: host.to_string(),
                    port: Some(port),
                })
            }
            None => Ok(Self {
                host: raw.to_string(),
                port: None,
            }),
        }
    }

    /// Port to connect to, falling back to `default_port`.
    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => write!(f, "{}:{}", host, port),
            None => write!(f, "{}", host),
        }
    }
}

/// Namespace root a path is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Realm {
    /// The virtual top level (`/`).
    Root,
    /// The virtual list of configured hosts (`/servers/`).
    ServersIndex,
    /// A user's local storage.
    Local {
        /// The authenticated user.
        user: String,
    },
    /// A remote host reached over SFTP.
    Remote {
        /// The host to connect to.
        host: RemoteHost,
    },
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Realm::Root => write!(f, "root"),
            Realm::ServersIndex => write!(f, "servers"),
            Realm::Local { user } => write!(f, "local:{}", user),
            Realm::Remote { host } => write!(f, "remote:{}", host),
        }
    }
}

/// A request path resolved into realm and relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    /// Realm the path belongs to.
    pub realm: Realm,
    /// Path inside the realm.
    pub path: RelPath,
}

impl PathKey {
    /// Resolve a request path for the authenticated `user`.
    ///
    /// A first segment equal to `user` selects local storage; `servers`
    /// selects the remote realm (`servers/<host>/<path>`). Any other first
    /// segment is `NotFound`, so a request never falls through to a realm it
    /// did not name.
    pub fn resolve(raw: &str, user: &str) -> Result<Self, FsError> {
        let trimmed = raw.trim_start_matches('/');
        let (first, rest) = match trimmed.split_once('/') {
            Some((first, rest)) => (first, rest),
            None => (trimmed, ""),
        };

        if first.is_empty() {
            return Ok(Self {
                realm: Realm::Root,
                path: RelPath::root(),
            });
        }

        if first == SERVERS_SEGMENT {
            let rest = rest.trim_start_matches('/');
            let (host, path) = match rest.split_once('/') {
                Some((host, path)) => (host, path),
                None => (rest, ""),
            };
            if host.is_empty() {
                return Ok(Self {
                    realm: Realm::ServersIndex,
                    path: RelPath::root(),
                });
            }
            return Ok(Self {
                realm: Realm::Remote {
                    host: RemoteHost::parse(host)?,
                },
                path: RelPath::parse(path)?,
            });
        }

        if !user.is_empty() && first == user {
            return Ok(Self {
                realm: Realm::Local {
                    user: user.to_string(),
                },
                path: RelPath::parse(rest)?,
            });
        }

        Err(FsError::NotFound(trimmed.to_string()))
    }

    /// Whether the realm is backed by real storage.
    pub fn is_storage(&self) -> bool {
        matches!(self.realm, Realm::Local { .. } | Realm::Remote { .. })
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.realm, self.path)
    }
}

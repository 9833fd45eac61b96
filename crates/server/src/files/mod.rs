//! Storage access for local and remote realms.
//!
//! This module provides:
//! - Realm and path resolution with traversal rejection
//! - A provider abstraction over local disk and SFTP
//! - Filtered directory listings with totals
//! - Range-aware, chunked file responses
//! - Sanitized, hashed uploads
//!
//! # Security
//!
//! Relative paths are validated lexically before they reach a provider. Local
//! paths are additionally canonicalized and must stay under the user's root,
//! so symbolic links cannot lead outside it.

pub mod browser;
pub mod error;
pub mod local;
pub mod path;
pub mod provider;
pub mod remote;
pub mod transfer;
pub mod upload;

pub use browser::{is_visible, root_listing, servers_listing, summarize, IGNORED_NAMES};
pub use error::FsError;
pub use local::{LocalHandle, LocalProvider};
pub use path::{PathKey, Realm, RelPath, RemoteHost};
pub use provider::{FileHandle, FilesystemProvider, Metadata, Provider, ReadAt};
pub use remote::{RemoteHandle, RemoteProvider};
pub use transfer::{StreamingResponder, TransferPlan};
pub use upload::{sanitize_filename, SavedFile};

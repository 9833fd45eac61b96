//! Payload definitions exchanged with the rendering layer.
//!
//! Directory listings and upload results are serialized as JSON. Field names
//! follow what the browser front-end already consumes (`mtime`, `type`,
//! `msg`).

use serde::{Deserialize, Serialize};

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Directory, or a symbolic link that resolves to one.
    Dir,
    /// Anything else.
    File,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Size in bytes as reported by the backing store.
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub mtime: u64,
}

impl DirectoryEntry {
    /// Create a directory row.
    pub fn dir(name: impl Into<String>, size: u64, mtime: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
            size,
            mtime,
        }
    }

    /// Create a file row.
    pub fn file(name: impl Into<String>, size: u64, mtime: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            mtime,
        }
    }
}

/// Running totals over a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListingTotals {
    /// Number of file entries.
    pub file: u64,
    /// Number of directory entries.
    pub dir: u64,
    /// Sum of entry sizes in bytes.
    pub size: u64,
}

/// A filtered directory listing with its totals.
///
/// Entries keep the order the backing store produced them in. Totals are only
/// ever updated through [`ListingSummary::push`], so every entry is counted
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListingSummary {
    /// Entries in provider order.
    pub entries: Vec<DirectoryEntry>,
    /// Accumulated totals.
    pub totals: ListingTotals,
}

impl ListingSummary {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and fold it into the totals.
    pub fn push(&mut self, entry: DirectoryEntry) {
        match entry.kind {
            EntryKind::Dir => self.totals.dir += 1,
            EntryKind::File => self.totals.file += 1,
        }
        self.totals.size = self.totals.size.saturating_add(entry.size);
        self.entries.push(entry);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the listing has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<DirectoryEntry> for ListingSummary {
    fn from_iter<I: IntoIterator<Item = DirectoryEntry>>(iter: I) -> Self {
        let mut summary = Self::new();
        for entry in iter {
            summary.push(entry);
        }
        summary
    }
}

/// Listing payload handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResponse {
    /// The logical path that was listed.
    pub path: String,
    /// Whether dotfiles were filtered out.
    pub hide_dotfile: bool,
    /// Entries in provider order.
    pub contents: Vec<DirectoryEntry>,
    /// Accumulated totals.
    pub total: ListingTotals,
}

impl ListingResponse {
    /// Wrap a summary for the given path and filter flag.
    pub fn new(path: impl Into<String>, hide_dotfile: bool, summary: ListingSummary) -> Self {
        Self {
            path: path.into(),
            hide_dotfile,
            contents: summary.entries,
            total: summary.totals,
        }
    }
}

/// Outcome status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// The file (or every file) was saved.
    Success,
    /// The file (or at least one file) failed.
    Error,
}

/// Per-file upload result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Name the file was saved under (sanitized), or the submitted name on failure.
    pub name: String,
    /// Outcome status.
    pub status: UploadStatus,
    /// Human-readable message.
    pub msg: String,
    /// Bytes written, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Hex SHA-256 of the written bytes, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Structured result of a batch upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    /// Overall status: `error` if any file failed.
    pub status: UploadStatus,
    /// Summary message.
    pub msg: String,
    /// Individual results, in submission order.
    #[serde(default)]
    pub files: Vec<FileOutcome>,
}

/// Message used when every file in a batch was saved.
pub const MSG_SAVED: &str = "File Saved";
/// Message used when a write targets no valid realm.
pub const MSG_FORBIDDEN: &str = "FORBIDDEN";
/// Message used when the upload target is not a directory.
pub const MSG_INVALID_OPERATION: &str = "Invalid Operation";

impl UploadReport {
    /// An empty report that will succeed unless a failure is recorded.
    pub fn new() -> Self {
        Self {
            status: UploadStatus::Success,
            msg: MSG_SAVED.to_string(),
            files: Vec::new(),
        }
    }

    /// A report rejecting the whole request without touching any file.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Error,
            msg: msg.into(),
            files: Vec::new(),
        }
    }

    /// Record a saved file.
    pub fn record_saved(&mut self, name: impl Into<String>, size: u64, sha256: impl Into<String>) {
        self.files.push(FileOutcome {
            name: name.into(),
            status: UploadStatus::Success,
            msg: MSG_SAVED.to_string(),
            size: Some(size),
            sha256: Some(sha256.into()),
        });
    }

    /// Record a failed file. The first failure becomes the summary message.
    pub fn record_failed(&mut self, name: impl Into<String>, msg: impl Into<String>) {
        let msg = msg.into();
        if self.status == UploadStatus::Success {
            self.status = UploadStatus::Error;
            self.msg = msg.clone();
        }
        self.files.push(FileOutcome {
            name: name.into(),
            status: UploadStatus::Error,
            msg,
            size: None,
            sha256: None,
        });
    }

    /// Number of files saved successfully.
    pub fn saved_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == UploadStatus::Success)
            .count()
    }
}

impl Default for UploadReport {
    fn default() -> Self {
        Self::new()
    }
}

//! # Filebridge Protocol Library
//!
//! Wire-level types shared by the Filebridge server and its clients.
//!
//! ## Overview
//!
//! - **Range parsing**: the single-range `bytes=<start>-[<end>]` grammar with
//!   an explicit lenient fallback for malformed headers
//! - **Listing payloads**: directory entries, totals, and the JSON document
//!   handed to the rendering layer
//! - **Upload payloads**: per-file and per-batch upload outcomes
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{DirectoryEntry, ListingSummary, RangeSpec};
//!
//! let range = RangeSpec::from_header_lenient(Some("bytes=100-")).unwrap();
//! assert_eq!(range.start, 100);
//! assert_eq!(range.end, None);
//!
//! let mut summary = ListingSummary::new();
//! summary.push(DirectoryEntry::file("notes.txt", 42, 0));
//! assert_eq!(summary.totals.file, 1);
//! ```
//!
//! ## Modules
//!
//! - [`range`]: `Range` header parsing
//! - [`messages`]: listing and upload payloads
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod range;

pub use error::{ProtocolError, Result};
pub use messages::{
    DirectoryEntry, EntryKind, FileOutcome, ListingResponse, ListingSummary, ListingTotals,
    UploadReport, UploadStatus, MSG_FORBIDDEN, MSG_INVALID_OPERATION, MSG_SAVED,
};
pub use range::{RangeSpec, BYTES_UNIT};

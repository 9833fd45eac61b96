//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed request metadata.
///
/// None of these reach an HTTP client directly: a bad `Range` header is
/// recovered by falling back to a whole-file transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The range header does not match `bytes=<start>-[<end>]`.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The range header uses a unit other than `bytes`.
    #[error("unsupported range unit: {0}")]
    UnsupportedUnit(String),

    /// More than one range was requested.
    #[error("multiple ranges are not supported: {0}")]
    MultipleRanges(String),

    /// The end of the range precedes its start.
    #[error("range end {end} is before start {start}")]
    InvertedRange {
        /// First byte requested.
        start: u64,
        /// Last byte requested.
        end: u64,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

//! HTTP byte-range header parsing.
//!
//! Only the single-range form `bytes=<start>-[<end>]` is understood. The parser
//! never sees the file size; clamping `end` against the actual length is done
//! by whoever serves the bytes.

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtocolError, Result};

/// The only range unit we serve.
pub const BYTES_UNIT: &str = "bytes";

/// A requested byte span, inclusive on both ends.
///
/// `end = None` means "to the end of the file".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeSpec {
    /// First byte requested.
    pub start: u64,
    /// Last byte requested, if bounded.
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Create a range from explicit bounds.
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// The whole-file range: from byte 0 with no upper bound.
    pub fn full() -> Self {
        Self::default()
    }

    /// Parse a raw `Range` header value.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (unit, spec) = value
            .split_once('=')
            .ok_or_else(|| ProtocolError::InvalidRange(value.to_string()))?;

        if unit.trim() != BYTES_UNIT {
            return Err(ProtocolError::UnsupportedUnit(unit.trim().to_string()));
        }
        if spec.contains(',') {
            return Err(ProtocolError::MultipleRanges(spec.to_string()));
        }

        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| ProtocolError::InvalidRange(value.to_string()))?;

        // Suffix ranges (`bytes=-500`) have no start and are not supported.
        let start = parse_offset(start.trim(), value)?;
        let end = match end.trim() {
            "" => None,
            end => Some(parse_offset(end, value)?),
        };

        if let Some(end) = end {
            if end < start {
                return Err(ProtocolError::InvertedRange { start, end });
            }
        }

        Ok(Self { start, end })
    }

    /// Interpret an optional `Range` header the lenient way.
    ///
    /// No header means no range. A header that does not parse becomes
    /// [`RangeSpec::full`], so a malformed request still gets the whole file.
    pub fn from_header_lenient(value: Option<&str>) -> Option<Self> {
        let value = value?;
        Some(Self::parse(value).unwrap_or_else(|_| Self::full()))
    }
}

impl FromStr for RangeSpec {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}={}-{}", BYTES_UNIT, self.start, end),
            None => write!(f, "{}={}-", BYTES_UNIT, self.start),
        }
    }
}

fn parse_offset(digits: &str, header: &str) -> Result<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidRange(header.to_string()));
    }
    digits
        .parse()
        .map_err(|_| ProtocolError::InvalidRange(header.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bounded() {
        let range = RangeSpec::parse("bytes=10-20").unwrap();
        assert_eq!(range, RangeSpec::new(10, Some(20)));
    }

    #[test]
    fn test_parse_open_ended() {
        let range = RangeSpec::parse("bytes=512-").unwrap();
        assert_eq!(range.start, 512);
        assert_eq!(range.end, None);
    }

    #[test]
    fn test_parse_single_byte() {
        let range = RangeSpec::parse("bytes=0-0").unwrap();
        assert_eq!(range, RangeSpec::new(0, Some(0)));
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let range = RangeSpec::parse("  bytes = 5 - 9 ").unwrap();
        assert_eq!(range, RangeSpec::new(5, Some(9)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RangeSpec::parse("bytes=abc"),
            Err(ProtocolError::InvalidRange(_))
        ));
        assert!(matches!(
            RangeSpec::parse("bytes=1-x"),
            Err(ProtocolError::InvalidRange(_))
        ));
        assert!(matches!(
            RangeSpec::parse("nonsense"),
            Err(ProtocolError::InvalidRange(_))
        ));
        assert!(RangeSpec::parse("bytes=+1-2").is_err());
    }

    #[test]
    fn test_parse_rejects_suffix_range() {
        assert!(matches!(
            RangeSpec::parse("bytes=-500"),
            Err(ProtocolError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_parse_rejects_other_units() {
        assert!(matches!(
            RangeSpec::parse("items=0-5"),
            Err(ProtocolError::UnsupportedUnit(_))
        ));
    }

    #[test]
    fn test_parse_rejects_multi_range() {
        assert!(matches!(
            RangeSpec::parse("bytes=0-10,20-30"),
            Err(ProtocolError::MultipleRanges(_))
        ));
    }

    #[test]
    fn test_parse_rejects_inverted() {
        assert_eq!(
            RangeSpec::parse("bytes=20-10"),
            Err(ProtocolError::InvertedRange { start: 20, end: 10 })
        );
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(RangeSpec::parse("bytes=99999999999999999999999-").is_err());
    }

    #[test]
    fn test_lenient_absent_header() {
        assert_eq!(RangeSpec::from_header_lenient(None), None);
    }

    #[test]
    fn test_lenient_falls_back_to_full() {
        for bad in ["bytes=abc", "bytes=0-10,20-30", "bytes=-5", "bytes=9-1", ""] {
            assert_eq!(
                RangeSpec::from_header_lenient(Some(bad)),
                Some(RangeSpec::full()),
                "header {bad:?} should fall back"
            );
        }
    }

    #[test]
    fn test_lenient_keeps_valid_range() {
        assert_eq!(
            RangeSpec::from_header_lenient(Some("bytes=3-7")),
            Some(RangeSpec::new(3, Some(7)))
        );
    }

    #[test]
    fn test_display_and_from_str() {
        let range: RangeSpec = "bytes=4-".parse().unwrap();
        assert_eq!(range.to_string(), "bytes=4-");
        assert_eq!(RangeSpec::new(1, Some(2)).to_string(), "bytes=1-2");
    }
}

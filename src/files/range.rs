//! `Range: bytes=start-end` handling for partial file responses.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Both ends are inclusive.
    pub fn len(&self) -> u64 {
        self.end.saturating_add(1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Content-Range` value for a satisfied range.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Range not satisfiable for size {size}")]
pub struct RangeError {
    pub size: u64,
}

impl RangeError {
    /// `Content-Range` value sent with a 416.
    pub fn content_range(&self) -> String {
        format!("bytes */{}", self.size)
    }
}

/// Parse a single `bytes=start-end` range; the end defaults to the last byte.
/// Suffix and multi-part ranges are not satisfiable.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let err = RangeError { size };
    let spec = header.trim().strip_prefix("bytes=").ok_or(err)?;
    if spec.contains(',') {
        return Err(RangeError { size });
    }
    let (start, end) = spec.split_once('-').ok_or(RangeError { size })?;

    let start: u64 = start.trim().parse().map_err(|_| RangeError { size })?;
    let end: u64 = match end.trim() {
        "" => size.saturating_sub(1),
        raw => raw.parse().map_err(|_| RangeError { size })?,
    };

    if size == 0 || start > end || end >= size {
        return Err(RangeError { size });
    }
    Ok(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_and_open_ranges() {
        assert_eq!(parse_range("bytes=0-99", 1000), Ok(ByteRange { start: 0, end: 99 }));
        assert_eq!(parse_range("bytes=900-", 1000), Ok(ByteRange { start: 900, end: 999 }));
        assert_eq!(parse_range("bytes=0-99", 1000).unwrap().len(), 100);
    }

    #[test]
    fn length_counts_both_ends() {
        let single = ByteRange { start: 7, end: 7 };
        assert_eq!(single.len(), 1);
        assert!(!single.is_empty());
        assert!(ByteRange { start: 8, end: 7 }.is_empty());
    }

    #[test]
    fn rejects_unsatisfiable_ranges() {
        assert!(parse_range("bytes=1000-1001", 1000).is_err());
        assert!(parse_range("bytes=50-10", 1000).is_err());
        assert!(parse_range("bytes=-100", 1000).is_err());
        assert!(parse_range("items=0-1", 1000).is_err());
        assert!(parse_range("bytes=0-1,4-5", 1000).is_err());
        assert_eq!(parse_range("bytes=x-1", 10).unwrap_err().content_range(), "bytes */10");
    }

    #[test]
    fn formats_content_range() {
        let range = ByteRange { start: 10, end: 19 };
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }
}

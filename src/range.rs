//! Byte ranges and `Range` header parsing.

use std::fmt;

/// An inclusive byte interval `[start, end]` within a resource of `total` bytes.
///
/// Built once per request, either from a `Range` header spec or as the
/// implicit full-file range, and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub total: u64,
}

impl ByteRange {
    /// Construct a range from inclusive bounds. Callers uphold `start <= end < total`.
    pub fn new(start: u64, end: u64, total: u64) -> Self {
        ByteRange { start, end, length: end - start + 1, total }
    }

    /// The range covering the whole resource. Empty for a zero-length resource.
    pub fn full(total: u64) -> Self {
        ByteRange {
            start: 0,
            end: total.saturating_sub(1),
            length: total,
            total,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.length == self.total
    }

    /// Value for a `Content-Range` header or multipart part header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The `Range` header was malformed, or one of its specs could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

/// Resolve a `Range` header against a resource of `total` bytes.
///
/// The header must have the shape `bytes=<spec>(,<spec>)*`, each spec being
/// `start-end`, `start-` or `-suffix`. Specs are resolved in order and never
/// merged, so overlapping specs yield overlapping ranges. The first spec that
/// resolves to `start > end` rejects the whole header.
///
/// `If-Range` short-circuits per-spec parsing: any value other than the
/// resource's `etag` yields the single full-file range. This holds both when
/// the value is an HTTP date and when it is not parseable at all, so an
/// unrecognised validator serves everything rather than failing closed. This
/// is legacy behaviour kept on purpose.
///
/// ```
/// use axum_byteserve::range::{parse_range_header, ByteRange};
///
/// let ranges = parse_range_header("bytes=-500", None, "movie.mp4", 1000).unwrap();
/// assert_eq!(ranges, vec![ByteRange::new(500, 999, 1000)]);
/// ```
pub fn parse_range_header(
    header: &str,
    if_range: Option<&str>,
    etag: &str,
    total: u64,
) -> Result<Vec<ByteRange>, Unsatisfiable> {
    let specs = header.strip_prefix("bytes=").ok_or(Unsatisfiable)?;
    if !specs.split(',').all(is_spec_shaped) {
        return Err(Unsatisfiable);
    }

    if if_range.is_some_and(|value| value != etag) {
        return Ok(vec![ByteRange::full(total)]);
    }

    specs
        .split(',')
        .map(|spec| resolve_spec(spec, total))
        .collect()
}

/// Matches `\d*-\d*`.
fn is_spec_shaped(spec: &str) -> bool {
    match spec.split_once('-') {
        Some((start, end)) => {
            start.bytes().all(|b| b.is_ascii_digit()) && end.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

fn resolve_spec(spec: &str, total: u64) -> Result<ByteRange, Unsatisfiable> {
    let (start, end) = spec.split_once('-').ok_or(Unsatisfiable)?;
    let start = parse_bound(start)?;
    let end = parse_bound(end)?;

    // nothing to address in an empty resource
    let last = total.checked_sub(1).ok_or(Unsatisfiable)?;

    let (start, end) = match (start, end) {
        (None, None) => return Err(Unsatisfiable),
        (None, Some(suffix)) => (total.saturating_sub(suffix), last),
        (Some(start), None) => (start, last),
        (Some(start), Some(end)) => (start, end.min(last)),
    };

    if start > end {
        return Err(Unsatisfiable);
    }
    Ok(ByteRange::new(start, end, total))
}

fn parse_bound(digits: &str) -> Result<Option<u64>, Unsatisfiable> {
    if digits.is_empty() {
        return Ok(None);
    }
    digits.parse().map(Some).map_err(|_| Unsatisfiable)
}

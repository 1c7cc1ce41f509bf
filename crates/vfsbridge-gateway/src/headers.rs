//! Request header parsing: ranges and conditionals.

use vfsbridge_vfs::RangeRequest;

/// Parses a `Range` header of the form `bytes=S-E`, `bytes=S-`, or
/// `bytes=-N`. Returns `None` for anything else (multi-range included).
pub fn parse_byte_range(header: &str) -> Option<RangeRequest> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start = start.trim();
    let end = end.trim();
    let range = RangeRequest {
        start: if start.is_empty() {
            None
        } else {
            Some(start.parse().ok()?)
        },
        end: if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        },
        etag: None,
    };
    if range.start.is_none() && range.end.is_none() {
        return None;
    }
    Some(range)
}

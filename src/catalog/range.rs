//! `Range` header parsing for downloads

use crate::upload::{ByteRange, UploadError};

/// Parse a single `bytes=` range against a file of `total` bytes.
///
/// Supports `a-b`, `a-` and the suffix form `-n`. The returned range is
/// half-open and clamped to the file. Multiple ranges are not supported.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange, UploadError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| UploadError::BadRequest(format!("invalid Range header: {}", header)))?;

    if spec.contains(',') {
        return Err(UploadError::BadRequest("multiple ranges not supported".to_string()));
    }

    let (start_part, end_part) = spec
        .split_once('-')
        .ok_or_else(|| UploadError::BadRequest(format!("invalid Range header: {}", header)))?;
    let (start_part, end_part) = (start_part.trim(), end_part.trim());

    let parse = |value: &str| {
        value
            .parse::<u64>()
            .map_err(|_| UploadError::BadRequest(format!("invalid Range header: {}", header)))
    };

    if start_part.is_empty() {
        let suffix = parse(end_part)?;
        if suffix == 0 || total == 0 {
            return Err(UploadError::RangeNotSatisfiable(total));
        }
        return Ok(ByteRange::new(total.saturating_sub(suffix), total));
    }

    let start = parse(start_part)?;
    let last = if end_part.is_empty() {
        None
    } else {
        Some(parse(end_part)?)
    };

    if let Some(last) = last {
        if start > last {
            return Err(UploadError::BadRequest(format!("invalid Range header: {}", header)));
        }
    }
    if start >= total {
        return Err(UploadError::RangeNotSatisfiable(total));
    }

    let end = last.map_or(total, |last| last.min(total - 1) + 1);
    Ok(ByteRange::new(start, end))
}

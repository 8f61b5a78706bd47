//! Received byte-range bookkeeping
//!
//! A `RangeSet` holds the half-open `[start, end)` ranges a session has
//! received, kept sorted with adjacent ranges merged.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start past end");
        Self { start, end }
    }

    /// Range covering `length` bytes from `offset`, or `None` on overflow
    pub fn from_offset(offset: u64, length: u64) -> Option<Self> {
        offset.checked_add(length).map(|end| Self::new(offset, end))
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Sorted, merged, non-overlapping set of received ranges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RangeSet {
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of bytes covered
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }

    /// End of the contiguous run starting at byte 0 (0 if byte 0 is missing)
    pub fn contiguous_end(&self) -> u64 {
        match self.ranges.first() {
            Some(first) if first.start == 0 => first.end,
            _ => 0,
        }
    }

    /// Whether the set is exactly `[0, total)`
    pub fn covers(&self, total: u64) -> bool {
        if total == 0 {
            return self.ranges.is_empty();
        }
        self.ranges.len() == 1 && self.ranges[0] == ByteRange::new(0, total)
    }

    /// First stored range overlapping `range`, if any
    pub fn find_overlap(&self, range: ByteRange) -> Option<ByteRange> {
        if range.is_empty() {
            return None;
        }
        let idx = self.ranges.partition_point(|r| r.end <= range.start);
        self.ranges
            .get(idx)
            .filter(|r| r.start < range.end)
            .copied()
    }

    /// Insert a range, merging with adjacent neighbours.
    ///
    /// Overlapping input is refused and returns the stored range it collides
    /// with; the set is left untouched in that case.
    pub fn insert(&mut self, range: ByteRange) -> Result<(), ByteRange> {
        if range.is_empty() {
            return Ok(());
        }
        if let Some(existing) = self.find_overlap(range) {
            return Err(existing);
        }

        let idx = self.ranges.partition_point(|r| r.end <= range.start);
        let joins_left = idx > 0 && self.ranges[idx - 1].end == range.start;
        let joins_right = idx < self.ranges.len() && self.ranges[idx].start == range.end;

        match (joins_left, joins_right) {
            (true, true) => {
                self.ranges[idx - 1].end = self.ranges[idx].end;
                self.ranges.remove(idx);
            }
            (true, false) => self.ranges[idx - 1].end = range.end,
            (false, true) => self.ranges[idx].start = range.start,
            (false, false) => self.ranges.insert(idx, range),
        }

        Ok(())
    }

    /// Gaps between received ranges up to `total`
    pub fn missing(&self, total: u64) -> Vec<ByteRange> {
        let mut gaps = Vec::new();
        let mut cursor = 0;

        for range in &self.ranges {
            if range.start >= total {
                break;
            }
            if range.start > cursor {
                gaps.push(ByteRange::new(cursor, range.start));
            }
            cursor = cursor.max(range.end);
        }

        if cursor < total {
            gaps.push(ByteRange::new(cursor, total));
        }

        gaps
    }
}

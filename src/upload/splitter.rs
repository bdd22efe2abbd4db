//! Split a buffer into multipart part ranges.

use std::num::NonZeroU64;
use std::ops::Range;

/// One contiguous slice of a buffer, numbered from 1 in buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

impl PartRange {
    /// Byte range of this part within the buffer.
    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.len as usize
    }
}

/// Iterator over the parts of a `total`-byte buffer.
///
/// Every part is exactly `part_size` bytes except possibly the last, which
/// holds the remainder.  An empty buffer yields no parts.
#[derive(Debug, Clone)]
pub struct PartSplitter {
    total: u64,
    part_size: u64,
    offset: u64,
    next_number: u32,
}

impl PartSplitter {
    pub fn new(total: u64, part_size: NonZeroU64) -> Self {
        Self {
            total,
            part_size: part_size.get(),
            offset: 0,
            next_number: 1,
        }
    }

    /// Number of parts a `total`-byte buffer splits into.
    pub fn part_count(total: u64, part_size: NonZeroU64) -> u64 {
        total.div_ceil(part_size.get())
    }
}

impl Iterator for PartSplitter {
    type Item = PartRange;

    fn next(&mut self) -> Option<PartRange> {
        if self.offset >= self.total {
            return None;
        }
        let len = self.part_size.min(self.total - self.offset);
        let part = PartRange {
            number: self.next_number,
            offset: self.offset,
            len,
        };
        self.offset += len;
        self.next_number += 1;
        Some(part)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.offset).div_ceil(self.part_size) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PartSplitter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn test_exact_multiple() {
        let parts: Vec<_> = PartSplitter::new(30, size(10)).collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len == 10));
        assert_eq!(
            parts.iter().map(|p| p.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_remainder_goes_to_last_part() {
        let parts: Vec<_> = PartSplitter::new(25, size(10)).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], PartRange { number: 1, offset: 0, len: 10 });
        assert_eq!(parts[1], PartRange { number: 2, offset: 10, len: 10 });
        assert_eq!(parts[2], PartRange { number: 3, offset: 20, len: 5 });
        assert_eq!(parts[2].range(), 20..25);
    }

    #[test]
    fn test_parts_cover_buffer_without_overlap() {
        for (total, part) in [(1u64, 1u64), (7, 3), (100, 7), (6 * 1024, 1024), (5, 10)] {
            let parts: Vec<_> = PartSplitter::new(total, size(part)).collect();
            let n = total / part;
            let r = total % part;
            assert_eq!(parts.len() as u64, n + u64::from(r > 0));
            assert_eq!(parts.len() as u64, PartSplitter::part_count(total, size(part)));

            let mut expected_offset = 0;
            for (i, p) in parts.iter().enumerate() {
                assert_eq!(p.offset, expected_offset);
                assert_eq!(p.number as usize, i + 1);
                if i + 1 < parts.len() {
                    assert_eq!(p.len, part);
                }
                expected_offset += p.len;
            }
            assert_eq!(expected_offset, total);
        }
    }

    #[test]
    fn test_empty_buffer_has_no_parts() {
        let mut splitter = PartSplitter::new(0, size(5));
        assert_eq!(splitter.len(), 0);
        assert!(splitter.next().is_none());
    }

    #[test]
    fn test_size_hint_tracks_progress() {
        let mut splitter = PartSplitter::new(25, size(10));
        assert_eq!(splitter.len(), 3);
        splitter.next();
        assert_eq!(splitter.len(), 2);
    }
}

//! Frame index: where each frame of a log starts and when it was recorded.

use std::ops::Index;

/// One located frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameIndexEntry {
    /// Absolute byte offset of the frame's first sync byte.
    pub byte_offset: u64,
    /// Decoded, scaled timestamp.
    pub timestamp: f64,
}

/// Ordered entries for one (log, format) pair.
///
/// Entries are in increasing byte-offset order. Timestamps are expected to be
/// non-decreasing; time lookups assume they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameIndex {
    entries: Vec<FrameIndexEntry>,
}

impl FrameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, byte_offset: u64, timestamp: f64) {
        debug_assert!(self.entries.last().is_none_or(|last| last.byte_offset < byte_offset));
        self.entries.push(FrameIndexEntry { byte_offset, timestamp });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&FrameIndexEntry> {
        self.entries.get(position)
    }

    pub fn entries(&self) -> &[FrameIndexEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameIndexEntry> {
        self.entries.iter()
    }

    /// Timestamp of the first frame.
    pub fn start_time(&self) -> Option<f64> {
        self.entries.first().map(|e| e.timestamp)
    }

    /// Timestamp of the last frame.
    pub fn end_time(&self) -> Option<f64> {
        self.entries.last().map(|e| e.timestamp)
    }

    /// `end_time - start_time`, or 0 for an empty index.
    pub fn duration(&self) -> f64 {
        match (self.start_time(), self.end_time()) {
            (Some(start), Some(end)) => end - start,
            _ => 0.0,
        }
    }

    /// Position of the first entry with `timestamp >= target`.
    ///
    /// Returns `len()` when every entry is earlier than `target`. Equivalently,
    /// the number of entries strictly before `target`.
    pub fn first_at_or_after(&self, target: f64) -> usize {
        self.entries.partition_point(|e| e.timestamp < target)
    }

    /// Whether timestamps never decrease.
    pub fn is_time_ordered(&self) -> bool {
        self.entries.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }
}

impl Index<usize> for FrameIndex {
    type Output = FrameIndexEntry;

    fn index(&self, position: usize) -> &FrameIndexEntry {
        &self.entries[position]
    }
}

impl<'a> IntoIterator for &'a FrameIndex {
    type Item = &'a FrameIndexEntry;
    type IntoIter = std::slice::Iter<'a, FrameIndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<FrameIndexEntry> for FrameIndex {
    fn from_iter<I: IntoIterator<Item = FrameIndexEntry>>(iter: I) -> Self {
        let mut entries: Vec<FrameIndexEntry> = iter.into_iter().collect();
        entries.sort_by_key(|e| e.byte_offset);
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(timestamps: &[f64]) -> FrameIndex {
        timestamps
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| FrameIndexEntry { byte_offset: i as u64 * 16, timestamp })
            .collect()
    }

    #[test]
    fn bounds_and_duration() {
        let index = index_of(&[5.0, 6.5, 9.0]);
        assert_eq!(index.start_time(), Some(5.0));
        assert_eq!(index.end_time(), Some(9.0));
        assert_eq!(index.duration(), 4.0);
        assert_eq!(index[1].byte_offset, 16);

        let empty = FrameIndex::new();
        assert_eq!(empty.start_time(), None);
        assert_eq!(empty.duration(), 0.0);
    }

    #[test]
    fn first_at_or_after_counts_earlier_entries() {
        let index = index_of(&[0.0, 1.0, 1.0, 2.0, 5.0]);
        assert_eq!(index.first_at_or_after(-1.0), 0);
        assert_eq!(index.first_at_or_after(0.0), 0);
        assert_eq!(index.first_at_or_after(0.5), 1);
        assert_eq!(index.first_at_or_after(1.0), 1);
        assert_eq!(index.first_at_or_after(1.5), 3);
        assert_eq!(index.first_at_or_after(5.0), 4);
        assert_eq!(index.first_at_or_after(5.1), 5);
    }

    #[test]
    fn detects_out_of_order_timestamps() {
        assert!(index_of(&[0.0, 0.0, 3.0]).is_time_ordered());
        assert!(!index_of(&[0.0, 4.0, 3.0]).is_time_ordered());
    }
}

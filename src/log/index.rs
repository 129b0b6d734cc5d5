//! Sparse timestamp index
//!
//! Built by one forward pass over a log: every `stride`-th record's offset
//! and timestamp is kept. When timestamps never decrease, a seek binary
//! searches the entries and scans at most one stride of records; otherwise
//! it scans from the first record.

/// One indexed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct SparseIndex {
    entries: Vec<IndexEntry>,
    stride: usize,
    records: u64,
    last_timestamp: Option<i64>,
    monotonic: bool,
}

impl SparseIndex {
    pub fn new(stride: usize) -> Self {
        Self {
            entries: Vec::new(),
            stride: stride.max(1),
            records: 0,
            last_timestamp: None,
            monotonic: true,
        }
    }

    /// Account for the next record of the forward pass
    pub fn observe(&mut self, offset: u64, timestamp: i64) {
        if self.last_timestamp.is_some_and(|last| timestamp < last) {
            self.monotonic = false;
        }
        if self.records % self.stride as u64 == 0 {
            self.entries.push(IndexEntry { offset, timestamp });
        }
        self.last_timestamp = Some(timestamp);
        self.records += 1;
    }

    /// Offset to start a linear scan for the first record at or after `timestamp`
    ///
    /// `None` when the log has no records.
    pub fn scan_start(&self, timestamp: i64) -> Option<u64> {
        let first = self.entries.first()?;
        if !self.monotonic {
            return Some(first.offset);
        }
        let idx = self.entries.partition_point(|e| e.timestamp < timestamp);
        Some(self.entries[idx.saturating_sub(1)].offset)
    }

    /// Whether timestamps never decreased during the pass
    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    /// Records seen by the pass
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

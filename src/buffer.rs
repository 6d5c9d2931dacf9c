//! Growable-but-bounded read buffer underlying record splitting.
//!
//! A `ScanBuffer` is one contiguous byte region with a read cursor
//! (`position`) and a write limit (`limit`). Invariant:
//! `0 <= position <= limit <= capacity`. Records are handed out as spans
//! into this region, so any operation that moves data (`compact`) reports
//! the shift and callers rebase their spans.
//!
//! Capacity starts small and doubles on demand up to a hard maximum; a
//! record that cannot fit even at the maximum is the caller's
//! `RecordTooLong` condition.

pub const DEFAULT_INIT_CAPACITY: usize = 64 * 1024;
pub const DEFAULT_MAX_CAPACITY: usize = 16 * 1024 * 1024;

pub struct ScanBuffer {
    data: Vec<u8>,
    max_capacity: usize,
    position: usize,
    limit: usize,
}

impl ScanBuffer {
    pub fn new(init_capacity: usize, max_capacity: usize) -> Self {
        debug_assert!(init_capacity > 0 && init_capacity <= max_capacity);
        Self {
            data: vec![0; init_capacity],
            max_capacity,
            position: 0,
            limit: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Unread bytes: `limit - position`.
    pub fn available(&self) -> usize {
        self.limit - self.position
    }

    /// Writable bytes: `capacity - limit`.
    pub fn free_space(&self) -> usize {
        self.data.len() - self.limit
    }

    /// Scans `[position + from, limit)` for the first occurrence of a
    /// (possibly multi-byte) delimiter sequence. The returned offset is
    /// relative to `position`. A sequence that only partially fits before
    /// `limit` is not a match.
    pub fn find(&self, delimiter: &[u8], from: usize) -> Option<usize> {
        let unread = &self.data[self.position..self.limit];
        if from >= unread.len() || delimiter.is_empty() {
            return None;
        }
        unread[from..]
            .windows(delimiter.len())
            .position(|w| w == delimiter)
            .map(|off| from + off)
    }

    /// Advances the read cursor past `n` consumed bytes.
    pub fn skip(&mut self, n: usize) {
        debug_assert!(n <= self.available());
        self.position += n;
    }

    /// Writes bytes at `limit`. Caller must have checked `free_space`.
    pub fn append(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.free_space());
        self.data[self.limit..self.limit + bytes.len()].copy_from_slice(bytes);
        self.limit += bytes.len();
    }

    /// The writable tail `[limit, capacity)`, the target of a refill.
    pub fn unfilled(&mut self) -> &mut [u8] {
        let limit = self.limit;
        &mut self.data[limit..]
    }

    /// Extends `limit` after a refill wrote `n` bytes into `unfilled()`.
    pub fn add_limit(&mut self, n: usize) {
        debug_assert!(n <= self.free_space());
        self.limit += n;
    }

    /// Moves the unread region `[position, limit)` to the front and returns
    /// the shift, so callers can rebase spans recorded against the old
    /// layout.
    pub fn compact(&mut self) -> usize {
        let shift = self.position;
        if shift > 0 {
            self.data.copy_within(self.position..self.limit, 0);
            self.limit -= shift;
            self.position = 0;
        }
        shift
    }

    /// Doubles capacity, clamped to the maximum. Returns false when already
    /// at the maximum.
    pub fn try_grow(&mut self) -> bool {
        let current = self.data.len();
        if current >= self.max_capacity {
            return false;
        }
        let target = (current * 2).min(self.max_capacity);
        self.data.resize(target, 0);
        true
    }

    /// Absolute slice accessor for spans produced by the splitters.
    pub fn bytes(&self, start: usize, end: usize) -> &[u8] {
        debug_assert!(start <= end && end <= self.limit);
        &self.data[start..end]
    }

    /// Whether the byte sequence at absolute offset `at` equals `seq`.
    pub fn matches_at(&self, at: usize, seq: &[u8]) -> bool {
        at + seq.len() <= self.limit && &self.data[at..at + seq.len()] == seq
    }
}

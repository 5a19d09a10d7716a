//! Fixed-capacity circular buffer of output lines.
//!
//! Each appended line gets a monotonically increasing sequence number,
//! enabling cursor-based pagination even after old lines are evicted. The
//! struct itself is single-writer; owners wrap it in their own read/write
//! lock and keep critical sections free of I/O.

/// A matched line and its global sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub seq: u64,
    pub line: String,
}

/// Lines kept per session when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct RingBuffer {
    lines: Vec<String>,
    cap: usize,
    /// Next write position (wraps around).
    head: usize,
    /// Current number of stored lines.
    count: usize,
    /// Total lines ever written.
    total_seq: u64,
}

impl RingBuffer {
    /// Create a ring buffer with the given capacity; 0 selects
    /// [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let cap = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            lines: vec![String::new(); cap],
            cap,
            head: 0,
            count: 0,
            total_seq: 0,
        }
    }

    /// Append a line and return its global sequence number.
    pub fn append(&mut self, line: String) -> u64 {
        let seq = self.total_seq;
        self.lines[self.head] = line;
        self.head = (self.head + 1) % self.cap;
        if self.count < self.cap {
            self.count += 1;
        }
        self.total_seq += 1;
        seq
    }

    /// Number of lines currently stored.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total number of lines ever appended.
    pub fn total_seq(&self) -> u64 {
        self.total_seq
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// The most recent `n` lines, oldest to newest. Returns fewer if the
    /// buffer holds less; zero yields nothing.
    pub fn last_n(&self, n: usize) -> Vec<String> {
        let n = n.min(self.count);
        if n == 0 {
            return Vec::new();
        }
        // head is the next write position, so the newest line is at head-1.
        let start = (self.head + self.cap - n) % self.cap;
        (0..n)
            .map(|i| self.lines[(start + i) % self.cap].clone())
            .collect()
    }

    /// Read up to `count` lines starting at global sequence `from`.
    ///
    /// Returns the lines, the next cursor, and whether more lines exist. A
    /// `from` older than the oldest retained line is clamped to it.
    pub fn read_range(&self, from: u64, count: usize) -> (Vec<String>, u64, bool) {
        if self.count == 0 || count == 0 {
            return (Vec::new(), from, false);
        }

        let oldest_seq = self.total_seq - self.count as u64;
        let from = from.max(oldest_seq);
        if from >= self.total_seq {
            return (Vec::new(), from, false);
        }

        let available = (self.total_seq - from) as usize;
        let count = count.min(available);

        let offset = (from - oldest_seq) as usize;
        let start = (self.head + self.cap - self.count + offset) % self.cap;
        let lines = (0..count)
            .map(|i| self.lines[(start + i) % self.cap].clone())
            .collect();

        let next_cursor = from + count as u64;
        let has_more = next_cursor < self.total_seq;
        (lines, next_cursor, has_more)
    }

    /// All retained lines, oldest to newest. Used for wrapper replay.
    pub fn all_lines(&self) -> Vec<String> {
        let start = (self.head + self.cap - self.count) % self.cap;
        (0..self.count)
            .map(|i| self.lines[(start + i) % self.cap].clone())
            .collect()
    }

    /// Case-insensitive substring search over retained lines, oldest to
    /// newest, capped at `max_results`. An empty pattern matches every line.
    pub fn search(&self, pattern: &str, max_results: usize) -> Vec<SearchResult> {
        if self.count == 0 || max_results == 0 {
            return Vec::new();
        }

        let pattern = pattern.to_lowercase();
        let oldest_seq = self.total_seq - self.count as u64;
        let start = (self.head + self.cap - self.count) % self.cap;

        let mut results = Vec::new();
        for i in 0..self.count {
            if results.len() >= max_results {
                break;
            }
            let line = &self.lines[(start + i) % self.cap];
            if line.to_lowercase().contains(&pattern) {
                results.push(SearchResult {
                    seq: oldest_seq + i as u64,
                    line: line.clone(),
                });
            }
        }
        results
    }

    /// Reset to empty. Sequence numbering restarts from zero (used when a
    /// reconnecting wrapper is about to replay authoritative history), and
    /// slot storage is released so long-lived buffers do not pin dead lines.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
        self.total_seq = 0;
        for slot in &mut self.lines {
            *slot = String::new();
        }
    }
}

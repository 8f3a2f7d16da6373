//! Growable output buffer for a child's stdout/stderr.
//!
//! Memory is bounded: once the buffer exceeds [`MAX_BUFFER_SIZE`] it is
//! compacted to the most recent [`COMPACT_KEEP`] bytes, so a runaway talker
//! cannot grow the supervisor without limit.

/// Capacity grows in steps of this many bytes.
pub const BUFFER_INCREMENT: usize = 1024;

/// Hard cap that triggers compaction.
pub const MAX_BUFFER_SIZE: usize = 10_000;

/// Bytes kept by a compaction.
pub const COMPACT_KEEP: usize = 9_000;

#[derive(Debug, Default)]
pub struct OutputBuffer {
    data: Vec<u8>,
    compactions: usize,
    discarded: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns how many bytes compaction threw away.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let needed = self.data.len() + bytes.len();
        if needed > self.data.capacity() {
            let target = needed.div_ceil(BUFFER_INCREMENT) * BUFFER_INCREMENT;
            self.data.reserve_exact(target - self.data.len());
        }
        self.data.extend_from_slice(bytes);

        if self.data.len() <= MAX_BUFFER_SIZE {
            return 0;
        }
        let freed = self.data.len() - COMPACT_KEEP;
        self.data.drain(..freed);
        self.compactions += 1;
        self.discarded += freed;
        freed
    }

    /// Removes and returns every complete line. Whatever follows the last
    /// newline stays buffered; a buffer with nothing left is released.
    pub fn take_lines(&mut self) -> Vec<String> {
        let Some(end) = self.data.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let lines = self.data[..end]
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(line)).into_owned())
            .collect();
        self.data.drain(..=end);
        if self.data.is_empty() {
            self.data = Vec::new();
        }
        lines
    }

    /// Removes and returns a trailing partial line, if any.
    pub fn take_rest(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.data).into_owned();
        self.data = Vec::new();
        Some(rest)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// How often this buffer has been compacted.
    pub fn compactions(&self) -> usize {
        self.compactions
    }

    /// Total bytes thrown away by compaction.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

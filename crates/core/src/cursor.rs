//! Bidirectional cursor over a materialized, key-ordered result set
//!
//! A cursor starts unpositioned. Every positioning call (`seek*`) moves it
//! onto an entry or leaves it invalid when no entry qualifies.

/// Cursor over ordered `(key, value)` pairs
#[derive(Debug, Clone, Default)]
pub struct KvCursor {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl KvCursor {
    /// Wrap entries already sorted by key with unique keys
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        KvCursor { entries, pos: None }
    }

    /// Whether the cursor currently points at an entry
    pub fn valid(&self) -> bool {
        self.pos.is_some()
    }

    /// Position on the smallest key
    pub fn seek_to_first(&mut self) {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
    }

    /// Position on the largest key
    pub fn seek_to_last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    /// Position on the first key `>= target`
    pub fn seek(&mut self, target: &[u8]) {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() < target);
        self.pos = (idx < self.entries.len()).then_some(idx);
    }

    /// Position on the last key `<= target`
    pub fn seek_for_prev(&mut self, target: &[u8]) {
        let idx = self.entries.partition_point(|(k, _)| k.as_slice() <= target);
        self.pos = idx.checked_sub(1);
    }

    /// Advance to the next key
    pub fn next(&mut self) {
        self.pos = match self.pos {
            Some(p) if p + 1 < self.entries.len() => Some(p + 1),
            _ => None,
        };
    }

    /// Step back to the previous key
    pub fn prev(&mut self) {
        self.pos = match self.pos {
            Some(p) if p > 0 => Some(p - 1),
            _ => None,
        };
    }

    /// Current key, if positioned
    pub fn key(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].0.as_slice())
    }

    /// Current value, if positioned
    pub fn value(&self) -> Option<&[u8]> {
        self.pos.map(|p| self.entries[p].1.as_slice())
    }

    /// Number of entries visible through this cursor
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cursor has nothing to visit
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the cursor, returning the ordered entries
    pub fn into_vec(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
    }
}

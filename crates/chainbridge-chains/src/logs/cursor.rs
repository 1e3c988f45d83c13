use std::sync::atomic::{AtomicU64, Ordering};

const UNSET: u64 = u64::MAX;

/// Lower bound of the next `getLogs` poll, shared by a filter and its
/// parser. Starts at the dialect's latest tag and only moves forward.
#[derive(Debug)]
pub struct LogCursor {
    next: AtomicU64,
}

impl Default for LogCursor {
    fn default() -> Self {
        Self { next: AtomicU64::new(UNSET) }
    }
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next block to ask for, if one has been observed.
    pub fn next_block(&self) -> Option<u64> {
        match self.next.load(Ordering::Acquire) {
            UNSET => None,
            n => Some(n),
        }
    }

    /// `from` value for the next request: hex block number or `latest_tag`.
    pub fn from_value(&self, latest_tag: &str) -> String {
        match self.next_block() {
            Some(n) => format!("0x{n:x}"),
            None => latest_tag.to_string(),
        }
    }

    /// Record that logs up to `seen` were delivered.
    pub fn advance(&self, seen: u64) {
        let next = seen.saturating_add(1);
        let _ = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur == UNSET || next > cur).then_some(next)
            });
    }
}

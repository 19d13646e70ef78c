use std::collections::BTreeMap;

use crate::mvcc::chain::Payload;
use crate::mvcc::Version;

/// A transaction frame: the writes buffered since begin, and the clock value
/// captured at begin.
///
/// Pending writes shadow the committed history and any outer frame. Within a
/// frame the newest write to a key wins. A key mapped to a tombstone is an
/// erasure; it stays in the map so it can shadow outer values.
pub struct TxFrame {
    /// Pending writes and erasures by key.
    pub(super) writes: BTreeMap<Vec<u8>, Payload>,

    /// The clock value at begin. Versions committed above it are invisible
    /// to reads resolving through this frame.
    pub(super) snapshot: Version,
}

impl TxFrame {
    /// Creates an empty frame pinned to the given snapshot.
    pub fn new(snapshot: Version) -> Self {
        Self { writes: BTreeMap::new(), snapshot }
    }

    /// Merges this frame's writes into the parent frame. Values and
    /// tombstones both propagate as-is, replacing older parent writes for
    /// the same keys. The parent keeps its own snapshot.
    pub fn merge_into(self, parent: &mut TxFrame) {
        parent.writes.extend(self.writes)
    }
}

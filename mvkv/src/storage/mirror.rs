use std::collections::{BTreeMap, BTreeSet};

use crate::error::CResult;
use crate::storage::Status;

/// A flat durable key/value table mirroring the latest live value of every
/// key, where both keys and values are arbitrary byte strings between
/// 0 B and 2 GB. The table holds no history and no tombstones; a deletion
/// removes the row.
///
/// The store above treats the mirror as an opaque sink: it enumerates every
/// row once on load, and hands over batches of upserts and deletions on
/// flush. One batch is all-or-nothing from the caller's viewpoint. The
/// mirror imposes no schema beyond the flat table; any richer structure is
/// the caller's in-memory concern.
///
/// Only supports single-threaded use since all methods take a mutable
/// reference -- serialized access can't be avoided anyway, since the MVCC
/// store above is itself serial.
pub trait Mirror: std::fmt::Display + Send + Sync {
    /// Enumerates every persisted entry. Order is unspecified.
    fn load_all(&mut self) -> CResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies a batch of upserts and deletions as a single unit. Deleting a
    /// row that does not exist is a no-op, as is the whole call once the
    /// mirror is closed.
    fn apply(
        &mut self,
        upserts: &BTreeMap<Vec<u8>, Vec<u8>>,
        deletions: &BTreeSet<Vec<u8>>,
    ) -> CResult<()>;

    /// Releases the backing resource. Subsequent apply calls are no-ops, and
    /// close itself is idempotent.
    fn close(&mut self) -> CResult<()>;

    /// Returns mirror status.
    fn status(&mut self) -> CResult<Status>;
}

//! This mod implements an MVCC (Multi-Version Concurrency Control) key-value
//! store with nested transactions and an optional durable mirror.
//!
//!
//! VERSIONS
//! ========
//! The store keeps every key's committed history as a version chain,
//! identified by a logical timestamp. Every committed write appends a new
//! version at a higher timestamp, with deletes appending a special tombstone
//! payload. Chains are only ever appended to, so a reader holding an old
//! snapshot can always resolve the value it saw at begin time.
//!
//! For example, the keys a,b,c,d may have the following values at various
//! logical timestamps (x is tombstone):
//!
//! Time
//! 5
//! 4  a4
//! 3      b3      x
//! 2
//! 1  a1      c1  d1
//!    a   b   c   d   Keys
//!
//! Outside a transaction, writes commit immediately (autocommit): each set or
//! delete takes the next clock tick and appends to the chain. A read outside
//! a transaction resolves to the newest entry of the chain, with tombstones
//! reading as absent.
//!
//!
//! TRANSACTIONS
//! ============
//! begin pushes a frame holding a snapshot timestamp (the clock at that
//! moment) and an overlay of pending writes. Transactions nest: each begin
//! pushes another frame on the stack. Writes and deletes go to the innermost
//! overlay and stay invisible to everyone else until the outermost commit.
//!
//! A read inside a transaction walks the overlays innermost to outermost and
//! returns the first pending write it finds (a pending tombstone reads as
//! absent). If no overlay holds the key, the committed chains are consulted
//! at the innermost frame's snapshot, so a transaction sees a stable picture
//! of committed state no matter what commits after it began, and repeated
//! reads of an untouched key always agree. The innermost snapshot is
//! deliberate for nested frames: an inner begin captures the clock at that
//! moment, so it observes versions committed between the outer begin and its
//! own begin that the outer overlay does not shadow.
//!
//! Committing a nested frame merges its overlay into the parent overlay,
//! newest write wins, with no validation. Committing the outermost frame
//! validates first-committer-wins: if any written key has a committed
//! version newer than the frame's snapshot, the commit fails with a
//! WriteConflict naming that key and the pending writes are dropped.
//! Otherwise every pending write is appended to its chain, each taking its
//! own clock tick. rollback drops the innermost frame unconditionally.
//!
//!
//! MIRROR
//! ======
//! The mirror is a flat durable key/value table holding the latest live
//! value per key and nothing else. flush projects the committed chains down
//! to their newest entries and hands the mirror one batch of upserts (live
//! values) and deletions (tombstones). Open transactions never reach the
//! mirror. On open, every mirrored row is loaded back as the sole entry of
//! its chain, each taking a clock tick, so a freshly loaded store behaves as
//! if the rows had just been written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::mvcc::chain::{Payload, VersionStore};
use crate::mvcc::overlay::TxFrame;
use crate::mvcc::Version;
use crate::storage::log_mirror::LogMirror;
use crate::storage::memory::Memory;
use crate::storage::mirror::Mirror;

/// Compact the mirror log on open once this share of it is garbage.
const COMPACT_GARBAGE_RATIO: f64 = 0.3;

/// An MVCC key-value store with nested transactions, over a durable mirror.
///
/// Only supports single-threaded use since all mutating methods take a
/// mutable reference. Callers handling parallel requests must wrap the store
/// in a coarse Mutex; the store does no locking of its own, and a caller
/// that abandons a session mid-transaction must roll it back.
pub struct Store<M: Mirror> {
    /// The committed version chains and the logical clock.
    pub(super) versions: VersionStore,

    /// Open transaction frames, outermost first. Empty means no transaction.
    tx_stack: Vec<TxFrame>,

    /// The durable mirror holding the latest live value per key.
    mirror: M,
}

impl Store<Memory> {
    /// Creates a store with no durable backing.
    pub fn in_memory() -> Self {
        Self { versions: VersionStore::new(), tx_stack: Vec::new(), mirror: Memory::new() }
    }
}

impl Store<LogMirror> {
    /// Opens a store over a file-backed mirror at the given path, compacting
    /// the mirror log if it is mostly garbage, and loading every persisted
    /// row into the version chains.
    pub fn open(path: PathBuf) -> CResult<Self> {
        Self::new(LogMirror::new_compact(path, COMPACT_GARBAGE_RATIO)?)
    }
}

impl<M: Mirror> Store<M> {
    /// Creates a store over the given mirror. Every mirrored row is appended
    /// as the sole entry of its key's chain, each row taking its own clock
    /// tick; rows load in an unspecified order.
    pub fn new(mirror: M) -> CResult<Self> {
        let mut store = Self { versions: VersionStore::new(), tx_stack: Vec::new(), mirror };
        store.load()?;
        Ok(store)
    }

    /// Like new, but additionally seeds the given entries after the mirror
    /// load, by the same protocol.
    pub fn with_initial(
        mirror: M,
        initial: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    ) -> CResult<Self> {
        let mut store = Self::new(mirror)?;
        for (key, value) in initial {
            store.versions.append(&key, Payload::Value(value));
        }
        Ok(store)
    }

    /// Loads the mirror's rows into the version chains.
    fn load(&mut self) -> CResult<()> {
        let rows = self.mirror.load_all()?;
        let count = rows.len();
        for (key, value) in rows {
            self.versions.append(&key, Payload::Value(value));
        }
        if count > 0 {
            log::info!("Loaded {} keys from {}", count, self.mirror);
        }
        Ok(())
    }

    /// Gets a value for a key, if it is visible.
    ///
    /// The overlays are consulted innermost to outermost and the first
    /// pending write wins. Otherwise, inside a transaction the committed
    /// chains are read at the innermost frame's snapshot; outside, the
    /// newest committed entry decides. Tombstones read as absent either way.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        for frame in self.tx_stack.iter().rev() {
            if let Some(payload) = frame.writes.get(key) {
                return payload.as_value().map(|v| v.to_vec());
            }
        }
        match self.tx_stack.last() {
            Some(frame) => self.versions.get_at(key, frame.snapshot).map(|v| v.to_vec()),
            None => {
                self.versions.latest(key).and_then(|entry| entry.payload.as_value()).map(|v| v.to_vec())
            }
        }
    }

    /// Sets a value for a key. Inside a transaction the write is buffered in
    /// the innermost overlay; outside it commits immediately as a new
    /// version (autocommit).
    pub fn set(&mut self, key: &[u8], value: Vec<u8>) {
        self.write(key, Payload::Value(value))
    }

    /// Deletes a key. Inside a transaction a tombstone is buffered in the
    /// innermost overlay; outside a tombstone version commits immediately.
    /// Deleting a missing key is fine and still records the tombstone.
    pub fn delete(&mut self, key: &[u8]) {
        self.write(key, Payload::Tombstone)
    }

    fn write(&mut self, key: &[u8], payload: Payload) {
        match self.tx_stack.last_mut() {
            Some(frame) => {
                frame.writes.insert(key.to_vec(), payload);
            }
            None => {
                self.versions.append(key, payload);
            }
        }
    }

    /// Begins a transaction, pushing a frame that snapshots the current
    /// clock. Transactions nest arbitrarily deep.
    pub fn begin(&mut self) {
        self.tx_stack.push(TxFrame::new(self.versions.clock()));
    }

    /// Commits the innermost transaction.
    ///
    /// A nested commit merges the popped overlay into the parent overlay,
    /// newest write wins, with no conflict check; validation is deferred to
    /// the outermost commit. The outermost commit checks every written key
    /// for a committed version newer than the frame's snapshot
    /// (first-committer-wins) and then appends all pending writes, each with
    /// its own clock tick.
    ///
    /// On WriteConflict the frame has already been popped, so the pending
    /// writes are gone and the committed chains are untouched; the caller
    /// must start the transaction over.
    pub fn commit(&mut self) -> CResult<()> {
        let frame = self.tx_stack.pop().ok_or(Error::NoActiveTransaction)?;

        if let Some(parent) = self.tx_stack.last_mut() {
            frame.merge_into(parent);
            return Ok(());
        }

        for key in frame.writes.keys() {
            if let Some(latest) = self.versions.latest(key) {
                if latest.version > frame.snapshot {
                    return Err(Error::WriteConflict(key.clone()));
                }
            }
        }
        for (key, payload) in frame.writes {
            self.versions.append(&key, payload);
        }
        Ok(())
    }

    /// Rolls back the innermost transaction, discarding its pending writes.
    pub fn rollback(&mut self) -> CResult<()> {
        self.tx_stack.pop().map(|_| ()).ok_or(Error::NoActiveTransaction)
    }

    /// Returns true if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.tx_stack.is_empty()
    }

    /// The transaction nesting depth, 0 outside a transaction.
    pub fn tx_depth(&self) -> usize {
        self.tx_stack.len()
    }

    /// Materializes the logical key/value view a reader would see now.
    ///
    /// Starts from the committed projection (at the innermost frame's
    /// snapshot inside a transaction, or the newest entries outside), then
    /// overlays every open frame outermost to innermost. Pending values
    /// overwrite, pending tombstones remove. The result carries no history
    /// and no timestamps.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut result = BTreeMap::new();
        match self.tx_stack.last() {
            Some(frame) => {
                for (key, _) in self.versions.iter() {
                    if let Some(value) = self.versions.get_at(key, frame.snapshot) {
                        result.insert(key.clone(), value.to_vec());
                    }
                }
            }
            None => {
                for (key, chain) in self.versions.iter() {
                    if let Some(value) = chain.last().and_then(|entry| entry.payload.as_value()) {
                        result.insert(key.clone(), value.to_vec());
                    }
                }
            }
        }
        for frame in self.tx_stack.iter() {
            for (key, payload) in frame.writes.iter() {
                match payload.as_value() {
                    Some(value) => {
                        result.insert(key.clone(), value.to_vec());
                    }
                    None => {
                        result.remove(key);
                    }
                }
            }
        }
        result
    }

    /// Flushes the committed state to the mirror as one batch. For every
    /// key, the newest chain entry decides: live values upsert their row,
    /// tombstones delete it. Overlays of open transactions are not yet
    /// committed and never reach the mirror. On failure the in-memory state
    /// is unaffected and the flush can simply be retried.
    pub fn flush(&mut self) -> CResult<()> {
        let mut upserts = BTreeMap::new();
        let mut deletions = BTreeSet::new();
        for (key, chain) in self.versions.iter() {
            match chain.last().and_then(|entry| entry.payload.as_value()) {
                Some(value) => {
                    upserts.insert(key.clone(), value.to_vec());
                }
                None => {
                    deletions.insert(key.clone());
                }
            }
        }
        self.mirror.apply(&upserts, &deletions)
    }

    /// Closes the mirror. The in-memory store stays fully usable, but later
    /// flushes are no-ops.
    pub fn close(&mut self) -> CResult<()> {
        self.mirror.close()
    }

    /// Returns store status.
    pub fn status(&mut self) -> CResult<Status> {
        Ok(Status {
            keys: self.versions.keys(),
            versions: self.versions.versions(),
            clock: self.versions.clock(),
            tx_depth: self.tx_stack.len() as u64,
            mirror: self.mirror.status()?,
        })
    }
}

/// Store status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The number of keys with a version chain, tombstoned keys included.
    pub keys: u64,

    /// The total number of committed versions across all chains.
    pub versions: u64,

    /// The current logical clock.
    pub clock: Version,

    /// The open transaction nesting depth.
    pub tx_depth: u64,

    /// The durable mirror.
    pub mirror: crate::storage::Status,
}

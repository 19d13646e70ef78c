use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::mvcc::Version;

/// A payload in a version chain or a transaction overlay: a live value, or a
/// tombstone recording a delete.
///
/// Deletes must be tombstones rather than removals, because a removal cannot
/// shadow an older committed version from a snapshot reader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Value(
        #[serde(with = "serde_bytes")]
        Vec<u8>,
    ),
    Tombstone,
}

impl Payload {
    /// Returns the live value, with tombstones mapping to None. Tombstones
    /// never escape a read.
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Tombstone => None,
        }
    }
}

/// A single committed version of a key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// The logical timestamp stamped on the version when it was committed.
    pub version: Version,

    /// The committed payload, tombstones included.
    pub payload: Payload,
}

/// The committed history: an append-only version chain per key, plus the
/// logical clock that stamps every committed write.
///
/// A chain is created lazily on the first write to its key and is never
/// empty afterwards. Entries are only ever appended, never rewritten or
/// removed, so old snapshots stay readable for the process lifetime.
/// Timestamps are strictly increasing along a chain and unique across all
/// chains, since every append takes its own clock tick.
pub struct VersionStore {
    /// Version chains by key, newest entry last.
    chains: BTreeMap<Vec<u8>, Vec<VersionEntry>>,

    /// The logical clock. Advances by exactly one per committed write,
    /// including loads and seeds, and never decreases.
    clock: Version,
}

impl VersionStore {
    /// Creates an empty version store with the clock at zero.
    pub fn new() -> Self {
        Self { chains: BTreeMap::new(), clock: 0 }
    }

    /// Returns the current clock value. A transaction beginning now would
    /// capture this as its snapshot.
    pub fn clock(&self) -> Version {
        self.clock
    }

    /// Returns the newest committed entry for a key, tombstone or not.
    pub fn latest(&self, key: &[u8]) -> Option<&VersionEntry> {
        self.chains.get(key).and_then(|chain| chain.last())
    }

    /// Returns the newest payload committed at or before the given
    /// timestamp, with tombstones mapping to None.
    ///
    /// Scans the chain newest to oldest; timestamps are strictly increasing,
    /// so the first entry at or below the bound is the visible one. The scan
    /// is O(chain length), which a binary search on the timestamp could
    /// avoid, but chains are short in practice.
    pub fn get_at(&self, key: &[u8], version: Version) -> Option<&[u8]> {
        let chain = self.chains.get(key)?;
        chain
            .iter()
            .rev()
            .find(|entry| entry.version <= version)
            .and_then(|entry| entry.payload.as_value())
    }

    /// Appends a new version of a key, advancing the clock by one and
    /// stamping the entry with it. Creates the chain on first write.
    /// Returns the assigned timestamp.
    pub fn append(&mut self, key: &[u8], payload: Payload) -> Version {
        self.clock += 1;
        self.chains
            .entry(key.to_vec())
            .or_default()
            .push(VersionEntry { version: self.clock, payload });
        self.clock
    }

    /// Iterates over all keys and their chains, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<VersionEntry>)> {
        self.chains.iter()
    }

    /// The number of keys with a chain, tombstoned keys included.
    pub fn keys(&self) -> u64 {
        self.chains.len() as u64
    }

    /// The total number of committed versions across all chains.
    pub fn versions(&self) -> u64 {
        self.chains.values().map(|chain| chain.len() as u64).sum()
    }
}

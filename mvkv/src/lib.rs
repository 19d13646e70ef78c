//! `mvkv` is an in-memory MVCC key-value store with nested transactions and
//! an optional durable mirror file. Committed writes append to per-key
//! version chains stamped by a logical clock; transactions buffer writes in
//! overlays pinned to the snapshot they began at, and the outermost commit
//! validates first-committer-wins before publishing. A flush reconciles the
//! latest live value per key into a flat append-only mirror log, which is
//! read back on the next open. [Author fengyang]
//!
//! ## Getting started
//!
//! ```rust
//! use mvkv::error::CResult;
//! use mvkv::mvcc::store::Store;
//!
//! fn main() {
//!     run().unwrap();
//! }
//!
//! fn run() -> CResult<()> {
//!     let mut store = Store::in_memory();
//!
//!     store.set(b"a", vec![0x01]);
//!     assert_eq!(store.get(b"a"), Some(vec![0x01]));
//!     assert_eq!(store.get(b"b"), None);
//!
//!     store.begin();
//!     store.set(b"b", vec![0x02]);
//!     store.delete(b"a");
//!     store.commit()?;
//!
//!     assert_eq!(store.get(b"a"), None);
//!     assert_eq!(store.get(b"b"), Some(vec![0x02]));
//!
//!     store.begin();
//!     store.set(b"c", vec![0x03]);
//!     store.rollback()?;
//!     assert_eq!(store.get(b"c"), None);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod mvcc;
pub mod storage;

#[cfg(test)]
mod test {
    use crate::error::CResult;
    use crate::mvcc::store::Store;

    #[test]
    fn run() -> CResult<()> {
        let path = tempdir::TempDir::new("demo")?.path().join("mvkvdb");

        let mut store = Store::open(path.clone())?;
        store.set(b"b", vec![0x01]);
        store.set(b"b", vec![0x02]);

        store.set(b"e", vec![0x05]);
        store.delete(b"e");

        store.begin();
        store.set(b"c", vec![0x00]);
        store.delete(b"c");
        store.set(b"c", vec![0x03]);
        store.commit()?;

        store.set(b"a", vec![0x01]);

        // Make sure the flushed mirror round-trips the live state.
        store.flush()?;
        let before = store.snapshot();
        store.close()?;
        drop(store);

        let store = Store::open(path)?;
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.get(b"a"), Some(vec![0x01]));
        assert_eq!(store.get(b"b"), Some(vec![0x02]));
        assert_eq!(store.get(b"c"), Some(vec![0x03]));
        assert_eq!(store.get(b"e"), None);

        Ok(())
    }
}

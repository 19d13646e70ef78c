pub mod log;
pub mod log_mirror;
pub mod memory;
pub mod mirror;

use serde_derive::{Deserialize, Serialize};

/// KeyDir是一个内存当中的map，这里使用的是BTreeMap的实现方式，便于进行顺序遍历进行compaction。
/// key为存储的key，而value为entry的metadata，记录长度和位置，用于进行偏移读取.
/// map当中始终保存当前key的最新版本的位置。
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

/// 用于表示当前镜像的状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The name of the mirror implementation.
    pub name: String,

    /// The number of live rows in the mirror.
    pub keys: u64,

    /// The logical size of live key/value pairs.
    pub size: u64,

    /// The on-disk size of all data, live and garbage.
    pub total_disk_size: u64,

    /// The on-disk size of live data.
    pub live_disk_size: u64,

    /// The on-disk size of garbage data.
    pub garbage_disk_size: u64,
}

#[cfg(test)]
mod tests {

    #[test]
    fn test() {
        assert_eq!(1, 1);
    }

    /// Generates common tests for any Mirror implementation.
    macro_rules! test_mirror {
        ($setup:expr) => {
            #[track_caller]
            /// Asserts that load_all yields exactly the expected rows. The
            /// enumeration order is unspecified, so rows are compared as maps.
            fn assert_rows(rows: Vec<(Vec<u8>, Vec<u8>)>, expect: Vec<(&[u8], Vec<u8>)>) {
                let rows: std::collections::BTreeMap<Vec<u8>, Vec<u8>> =
                    rows.into_iter().collect();
                let expect: std::collections::BTreeMap<Vec<u8>, Vec<u8>> =
                    expect.into_iter().map(|(k, v)| (k.to_vec(), v)).collect();
                assert_eq!(rows, expect);
            }

            fn upserts(rows: Vec<(&[u8], Vec<u8>)>) -> std::collections::BTreeMap<Vec<u8>, Vec<u8>> {
                rows.into_iter().map(|(k, v)| (k.to_vec(), v)).collect()
            }

            fn deletions(keys: Vec<&[u8]>) -> std::collections::BTreeSet<Vec<u8>> {
                keys.into_iter().map(|k| k.to_vec()).collect()
            }

            /// A fresh mirror holds no rows.
            #[test]
            fn load_all_empty() -> crate::error::CResult<()> {
                let mut m = $setup;
                assert_rows(m.load_all()?, vec![]);
                Ok(())
            }

            /// Applied upserts are enumerable, and later upserts replace
            /// earlier rows for the same key.
            #[test]
            fn apply_and_enumerate() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(&upserts(vec![(b"a", vec![1]), (b"b", vec![2])]), &deletions(vec![]))?;
                assert_rows(m.load_all()?, vec![(b"a", vec![1]), (b"b", vec![2])]);

                m.apply(&upserts(vec![(b"a", vec![9])]), &deletions(vec![]))?;
                assert_rows(m.load_all()?, vec![(b"a", vec![9]), (b"b", vec![2])]);

                Ok(())
            }

            /// Deletions remove rows; deleting a missing row is a no-op.
            #[test]
            fn apply_deletions() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(&upserts(vec![(b"a", vec![1]), (b"b", vec![2])]), &deletions(vec![]))?;
                m.apply(&upserts(vec![]), &deletions(vec![b"b", b"missing"]))?;
                assert_rows(m.load_all()?, vec![(b"a", vec![1])]);

                Ok(())
            }

            /// One batch can carry both upserts and deletions.
            #[test]
            fn apply_mixed_batch() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(&upserts(vec![(b"a", vec![1])]), &deletions(vec![]))?;
                m.apply(&upserts(vec![(b"b", vec![2])]), &deletions(vec![b"a"]))?;
                assert_rows(m.load_all()?, vec![(b"b", vec![2])]);

                Ok(())
            }

            /// Empty keys and values are as valid as any other.
            #[test]
            fn apply_empty_key_value() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(&upserts(vec![(b"", vec![])]), &deletions(vec![]))?;
                assert_rows(m.load_all()?, vec![(b"", vec![])]);

                Ok(())
            }

            /// close renders later applies no-ops, and is itself idempotent.
            #[test]
            fn close_is_terminal() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(&upserts(vec![(b"a", vec![1])]), &deletions(vec![]))?;
                m.close()?;
                m.apply(&upserts(vec![(b"b", vec![2])]), &deletions(vec![b"a"]))?;
                m.close()?;

                Ok(())
            }

            /// Tests implementation-independent aspects of Status.
            #[test]
            fn status() -> crate::error::CResult<()> {
                let mut m = $setup;

                m.apply(
                    &upserts(vec![(b"foo", vec![1, 2, 3]), (b"bar", vec![1])]),
                    &deletions(vec![]),
                )?;
                m.apply(&upserts(vec![]), &deletions(vec![b"bar"]))?;

                let status = m.status()?;
                assert!(status.name.len() > 0);
                assert_eq!(status.keys, 1);
                assert_eq!(status.size, 6);

                Ok(())
            }
        };
    }

    pub(super) use test_mirror; // export for use in submodules
}

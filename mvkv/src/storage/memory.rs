use std::collections::{BTreeMap, BTreeSet};

use crate::error::CResult;
use crate::storage::mirror::Mirror;
use crate::storage::Status;

/// 纯内存的镜像，使用的就是BTreeMap，将key和value直接存储在内存当中，不会对数据进行持久化。
/// It backs mirror-less stores and tests.
pub struct Memory {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    closed: bool,
}

impl Memory {
    /// Creates a Memory key-value mirror.
    pub fn new() -> Self {
        Self { data: BTreeMap::new(), closed: false }
    }
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory")
    }
}

impl Mirror for Memory {
    fn load_all(&mut self) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn apply(
        &mut self,
        upserts: &BTreeMap<Vec<u8>, Vec<u8>>,
        deletions: &BTreeSet<Vec<u8>>,
    ) -> CResult<()> {
        if self.closed {
            return Ok(());
        }
        for (key, value) in upserts {
            self.data.insert(key.clone(), value.clone());
        }
        for key in deletions {
            self.data.remove(key);
        }
        Ok(())
    }

    fn close(&mut self) -> CResult<()> {
        self.closed = true;
        Ok(())
    }

    fn status(&mut self) -> CResult<Status> {
        Ok(Status {
            name: self.to_string(),
            keys: self.data.len() as u64,
            size: self.data.iter().fold(0, |size, (k, v)| size + k.len() as u64 + v.len() as u64),
            total_disk_size: 0,
            live_disk_size: 0,
            garbage_disk_size: 0,
        })
    }
}

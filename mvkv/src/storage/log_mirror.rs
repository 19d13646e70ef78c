use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{CResult, Error};
use crate::storage::log::Log;
use crate::storage::mirror::Mirror;
use crate::storage::{KeyDir, Status};

/// A file-backed mirror in the manner of a very simple Bitcask.
///
/// LogMirror writes key/value rows to an append-only log file, and keeps a
/// mapping of keys to file positions in memory. All live keys must fit in
/// memory. Deletions write a tombstone row to the log file; tombstoned keys
/// leave the keydir, so enumeration only ever yields live rows. To remove
/// old garbage, the log can be compacted by writing a new log containing
/// only live data, skipping replaced values and tombstones.
///
/// This makes several significant simplifications over standard Bitcask:
///
/// - Instead of writing multiple fixed-size log files, it uses a single
///   append-only log file of arbitrary size. This increases the compaction
///   volume, since the entire log file must be rewritten on every compaction,
///   and can exceed the filesystem's file size limit.
///
/// - Hint files are not used, the log itself is scanned when opened to
///   build the keydir.
///
/// - Rows don't contain timestamps or checksums.
pub struct LogMirror {
    /// The active append-only log file.
    log: Log,

    /// use index, Maps keys to a value position and length in the log file.
    keydir: KeyDir,

    /// Whether close() has been called. A closed mirror ignores applies.
    closed: bool,
}

impl LogMirror {
    /// Opens or creates a LogMirror in the given file.
    pub fn new(path: PathBuf) -> CResult<Self> {
        let mut log = Log::new(path)?;
        let keydir = log.build_keydir()?;
        Ok(Self { log, keydir, closed: false })
    }

    /// Opens a LogMirror, and automatically compacts it if the amount
    /// of garbage exceeds the given ratio when opened.
    pub fn new_compact(path: PathBuf, garbage_ratio_threshold: f64) -> CResult<Self> {
        let mut s = Self::new(path)?;

        let status = s.status()?;
        let garbage_ratio = status.garbage_disk_size as f64 / status.total_disk_size as f64;
        if status.garbage_disk_size > 0 && garbage_ratio >= garbage_ratio_threshold {
            log::info!(
                "Compacting {} to remove {:.3}MB garbage ({:.0}% of {:.3}MB)",
                s.log.path.display(),
                status.garbage_disk_size / 1024 / 1024,
                garbage_ratio * 100.0,
                status.total_disk_size / 1024 / 1024
            );
            s.compact()?;
            log::info!(
                "Compacted {} to size {:.3}MB",
                s.log.path.display(),
                (status.total_disk_size - status.garbage_disk_size) / 1024 / 1024
            );
        }

        Ok(s)
    }

    /// Compacts the current log file by writing out a new log file containing
    /// only live rows and replacing the current file with it.
    pub fn compact(&mut self) -> CResult<()> {
        let mut tmp_path = self.log.path.clone();
        // need double disk size
        tmp_path.set_extension("new");

        let (mut new_log, new_keydir) = self.write_log(tmp_path)?;

        std::fs::rename(&new_log.path, &self.log.path).map_err(|err| {
            Error::Io(format!(
                "mirror compact rename from {:?} to {:?} failed: {}",
                new_log.path.to_str(),
                self.log.path.to_str(),
                err
            ))
        })?;

        new_log.path = self.log.path.clone();

        self.log = new_log;
        self.keydir = new_keydir;
        Ok(())
    }

    /// Writes out a new log file with the live rows of the current log file
    /// and returns it along with its keydir. Rows are written in key order.
    fn write_log(&mut self, path: PathBuf) -> CResult<(Log, KeyDir)> {
        let mut new_keydir = KeyDir::new();
        let mut new_log = Log::new(path)?;
        new_log.file.set_len(0)?; // truncate file if it exists
        for (key, (value_pos, value_len)) in self.keydir.iter() {
            let value = self.log.read_value(*value_pos, *value_len)?;
            let (pos, len) = new_log.write_entry(key, Some(&value))?;
            new_keydir.insert(key.clone(), (pos + len as u64 - *value_len as u64, *value_len));
        }
        Ok((new_log, new_keydir))
    }
}

impl std::fmt::Display for LogMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log mirror")
    }
}

impl Mirror for LogMirror {
    fn load_all(&mut self) -> CResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::with_capacity(self.keydir.len());
        for (key, (value_pos, value_len)) in &self.keydir {
            rows.push((key.clone(), self.log.read_value(*value_pos, *value_len)?));
        }
        Ok(rows)
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
            let (pos, len) = self.log.write_entry(key, Some(value))?;
            let value_len = value.len() as u32;
            self.keydir.insert(key.clone(), (pos + len as u64 - value_len as u64, value_len));
        }
        for key in deletions {
            self.log.write_entry(key, None)?;
            self.keydir.remove(key);
        }
        // One sync per batch, so the batch reaches disk as a unit.
        Ok(self.log.file.sync_all()?)
    }

    fn close(&mut self) -> CResult<()> {
        if self.closed {
            return Ok(());
        }
        self.log.file.sync_all()?;
        fs4::FileExt::unlock(&self.log.file)?;
        self.closed = true;
        Ok(())
    }

    fn status(&mut self) -> CResult<Status> {
        let keys = self.keydir.len() as u64;
        let size = self
            .keydir
            .iter()
            .fold(0, |size, (key, (_, value_len))| size + key.len() as u64 + *value_len as u64);
        let total_disk_size = self.log.file.metadata()?.len();
        let live_disk_size = size + 8 * keys; // account for length prefixes
        let garbage_disk_size = total_disk_size - live_disk_size;
        Ok(Status {
            name: self.to_string(),
            keys,
            size,
            total_disk_size,
            live_disk_size,
            garbage_disk_size,
        })
    }
}

/// Attempt to flush the file when the LogMirror is dropped.
impl Drop for LogMirror {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.log.file.sync_all() {
            log::error!("failed to flush file: {}", error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    super::super::tests::test_mirror!(
        LogMirror::new(tempdir::TempDir::new("mvkv").unwrap().path().join("mirrordb")).unwrap()
    );

    fn rows(pairs: Vec<(&[u8], Vec<u8>)>) -> BTreeMap<Vec<u8>, Vec<u8>> {
        pairs.into_iter().map(|(k, v)| (k.to_vec(), v)).collect()
    }

    /// Rows survive a close and reopen; deleted rows do not.
    #[test]
    fn reopen_keeps_live_rows() -> CResult<()> {
        let dir = tempdir::TempDir::new("mvkv")?;
        let path = dir.path().join("mirrordb");

        let mut m = LogMirror::new(path.clone())?;
        m.apply(&rows(vec![(b"a", vec![1]), (b"b", vec![2])]), &BTreeSet::new())?;
        m.apply(&BTreeMap::new(), &[b"b".to_vec()].into_iter().collect())?;
        m.close()?;
        drop(m);

        let mut m = LogMirror::new(path)?;
        assert_eq!(m.load_all()?, vec![(b"a".to_vec(), vec![1])]);

        Ok(())
    }

    /// Compaction drops replaced values and tombstones but keeps every live
    /// row readable.
    #[test]
    fn compact_keeps_live_rows() -> CResult<()> {
        let dir = tempdir::TempDir::new("mvkv")?;
        let path = dir.path().join("mirrordb");

        let mut m = LogMirror::new(path)?;
        m.apply(&rows(vec![(b"a", vec![1]), (b"b", vec![2])]), &BTreeSet::new())?;
        m.apply(&rows(vec![(b"a", vec![9])]), &[b"b".to_vec()].into_iter().collect())?;

        let garbage_before = m.status()?.garbage_disk_size;
        assert!(garbage_before > 0);

        m.compact()?;

        assert_eq!(m.status()?.garbage_disk_size, 0);
        assert_eq!(m.load_all()?, vec![(b"a".to_vec(), vec![9])]);

        Ok(())
    }

    /// A closed mirror releases its file lock, so another mirror can take
    /// the same path over.
    #[test]
    fn close_releases_lock() -> CResult<()> {
        let dir = tempdir::TempDir::new("mvkv")?;
        let path = dir.path().join("mirrordb");

        let mut m = LogMirror::new(path.clone())?;
        assert!(LogMirror::new(path.clone()).is_err());

        m.close()?;
        assert!(LogMirror::new(path).is_ok());

        Ok(())
    }
}

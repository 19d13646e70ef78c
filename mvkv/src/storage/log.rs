use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fs4::FileExt;

use crate::error::{CResult, Error};
use crate::storage::KeyDir;

/// An append-only mirror log file, containing a sequence of key/value entries
/// encoded as follows:
///
/// - Key length as big-endian u32.
/// - Value length as big-endian i32, or -1 for tombstones.
/// - Key as raw bytes (max 2 GB).
/// - Value as raw bytes (max 2 GB).
pub struct Log {
    /// Path to the log file.
    pub(crate) path: PathBuf,
    /// The opened file containing the log.
    pub(crate) file: std::fs::File,
}

impl Log {
    /// Opens a log file, or creates one if it does not exist.
    /// Takes out an exclusive lock on the file until it is closed, or errors if the lock is already held.
    pub fn new(path: PathBuf) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|err| Error::Io(format!("{}: {:?}", err, dir.to_str())))?;
        }

        let file = std::fs::OpenOptions::new()
                            .read(true)
                            .write(true)
                            .create(true)
                            .open(&path)?;

        // 锁文件。不允许其他进程篡改。如果其他进程尝试打开，则报错。
        file.try_lock_exclusive()?;

        Ok(Self { path, file })
    }

    /// Rebuilds the keydir by scanning the log file from the start, keeping
    /// the latest live position per key and dropping keys whose newest entry
    /// is a tombstone. If an incomplete entry is found at the end of the
    /// file, it is assumed to be an interrupted write and the file is
    /// truncated there.
    pub fn build_keydir(&mut self) -> CResult<KeyDir> {
        let mut len_buf = [0u8; 4];
        let mut keydir = KeyDir::new();
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);
        let mut pos = r.seek(SeekFrom::Start(0))?;

        while pos < file_len {
            // Read the next entry from the file, returning the key, value
            // position, and value length or None for tombstones.
            let mut result = || -> Result<(Vec<u8>, u64, Option<u32>), std::io::Error> {
                r.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                r.read_exact(&mut len_buf)?;
                let value_len_or_tombstone = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None, // -1 for tombstones
                };
                let value_pos = pos + 4 + 4 + key_len as u64;

                let mut key = vec![0; key_len as usize];
                r.read_exact(&mut key)?;

                if let Some(value_len) = value_len_or_tombstone {
                    if value_pos + value_len as u64 > file_len {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "value extends beyond end of file",
                        ));
                    }
                    r.seek_relative(value_len as i64)?; // avoids discarding buffer
                }

                Ok((key, value_pos, value_len_or_tombstone))
            };

            match result() {
                // Populate the keydir with the entry, or remove it on tombstones.
                Ok((key, value_pos, Some(value_len))) => {
                    keydir.insert(key, (value_pos, value_len));
                    pos = value_pos + value_len as u64;
                }
                Ok((key, value_pos, None)) => {
                    keydir.remove(&key);
                    pos = value_pos;
                }

                // If an incomplete entry was found at the end of the file, assume an
                // incomplete write and truncate the file.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::error!("Found incomplete entry at offset {}, truncating file", pos);
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(keydir)
    }

    /// Reads a value according to the given offset and length.
    pub fn read_value(&mut self, value_pos: u64, value_len: u32) -> CResult<Vec<u8>> {
        let mut value = vec![0; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends a key/value entry to the log file, using a None value for
    /// tombstones. It returns the position and length of the entry.
    pub fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> CResult<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let len = 4 + 4 + key_len + value_len;

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(len as usize, &mut self.file);
        w.write_all(&key_len.to_be_bytes())?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        w.write_all(key)?;
        if let Some(value) = value {
            w.write_all(value)?;
        }
        w.flush()?;

        Ok((pos, len))
    }
}

#[cfg(test)]
mod test {
    use std::io::{Seek, SeekFrom, Write};

    use super::*;

    /// Entries survive a keydir rebuild, with replaced values and tombstoned
    /// keys dropped.
    #[test]
    fn build_keydir_keeps_latest_live() -> CResult<()> {
        let path = tempfile::tempdir()?.path().join("mirrordb");

        let mut log = Log::new(path)?;
        log.write_entry(b"a", Some(&[1]))?;
        log.write_entry(b"b", Some(&[2]))?;
        log.write_entry(b"a", Some(&[3]))?;
        log.write_entry(b"b", None)?;

        let keydir = log.build_keydir()?;
        assert_eq!(keydir.len(), 1);

        let (value_pos, value_len) = keydir[b"a".as_slice()];
        assert_eq!(log.read_value(value_pos, value_len)?, vec![3]);

        Ok(())
    }

    /// A torn trailing entry is truncated away, keeping the complete prefix.
    #[test]
    fn build_keydir_truncates_partial_tail() -> CResult<()> {
        let path = tempfile::tempdir()?.path().join("mirrordb");

        let mut log = Log::new(path)?;
        log.write_entry(b"a", Some(&[1]))?;
        let (clean_len, _) = log.write_entry(b"b", Some(&[2]))?;
        let clean_len = clean_len + (4 + 4 + 1 + 1);

        // Half an entry: a key length with no key behind it.
        log.file.seek(SeekFrom::End(0))?;
        log.file.write_all(&7u32.to_be_bytes())?;

        let keydir = log.build_keydir()?;
        assert_eq!(keydir.len(), 2);
        assert_eq!(log.file.metadata()?.len(), clean_len);

        Ok(())
    }

    /// The log holds an exclusive lock while open.
    #[test]
    fn lock_is_exclusive() -> CResult<()> {
        let dir = tempdir::TempDir::new("mvkv")?;
        let path = dir.path().join("mirrordb");

        let log = Log::new(path.clone())?;
        assert!(Log::new(path.clone()).is_err());

        drop(log);
        assert!(Log::new(path).is_ok());

        Ok(())
    }
}

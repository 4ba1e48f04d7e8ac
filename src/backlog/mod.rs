//! Two-tier (memory + disk) FIFO queue of opaque byte blobs.
//!
//! A backlog holds the events a node cannot receive right now. Entries go
//! to memory while the memory budget allows; the first entry that does not
//! fit opens a disk file, and from then on every entry goes to disk until
//! the file has been read back completely. Memory entries are therefore
//! always older than disk entries and reads drain memory first.
//!
//! Disk records are a little-endian `u32` length followed by the payload.
//!
//! # Example
//!
//! ```
//! use nodelink::backlog::Backlog;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut backlog = Backlog::create(Some(dir.path().join("q.binlog")), 100, 1000, true).unwrap();
//!
//! backlog.add(&[1u8; 40]).unwrap();
//! backlog.add(&[2u8; 40]).unwrap();
//! backlog.add(&[3u8; 40]).unwrap(); // does not fit in memory, spills
//!
//! assert_eq!(backlog.num_entries(), 3);
//! assert_eq!(backlog.read().unwrap().unwrap()[0], 1);
//! ```

mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::BacklogError;

pub use snapshot::{SnapshotMeta, SNAPSHOT_FORMAT};

/// Size of the length prefix of a disk record.
pub const RECORD_PREFIX_SIZE: u64 = 4;

type Result<T> = std::result::Result<T, BacklogError>;

/// Which tier the most recent `read` was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastRead {
    Memory,
    File { len: u64 },
}

/// A two-tier FIFO queue.
#[derive(Debug)]
pub struct Backlog {
    path: Option<PathBuf>,
    file: Option<File>,
    max_mem: u64,
    max_file: u64,

    // memory tier: slots [read_index, write_index) hold unread entries
    cache: Vec<Option<Bytes>>,
    read_index: usize,
    write_index: usize,
    mem_bytes: u64,

    // file tier
    file_size: u64,
    file_read_pos: u64,
    file_entries: u64,
    file_payload: u64,

    last_read: Option<LastRead>,
    valid: bool,
    warned_full: bool,
}

impl Backlog {
    /// Create an empty backlog.
    ///
    /// `path` may be `None` for a memory-only backlog; entries that do not
    /// fit in memory are then refused with [`BacklogError::NoPath`].
    /// With `unlink_existing`, a stale file at `path` is removed first.
    pub fn create(
        path: Option<PathBuf>,
        max_mem: u64,
        max_file: u64,
        unlink_existing: bool,
    ) -> Result<Self> {
        if unlink_existing {
            if let Some(path) = &path {
                remove_if_exists(path)?;
            }
        }

        Ok(Self {
            path,
            file: None,
            max_mem,
            max_file,
            cache: Vec::new(),
            read_index: 0,
            write_index: 0,
            mem_bytes: 0,
            file_size: 0,
            file_read_pos: 0,
            file_entries: 0,
            file_payload: 0,
            last_read: None,
            valid: true,
            warned_full: false,
        })
    }

    /// Append an entry at the tail.
    ///
    /// # Errors
    ///
    /// - `Invalidated` if the backlog was invalidated
    /// - `NoSpace` if the disk budget would be exceeded
    /// - `NoPath` if the entry must spill but there is no file path
    /// - `Incomplete` if the disk record could not be written; the backlog
    ///   is invalidated in that case
    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        if !self.valid {
            return Err(BacklogError::Invalidated);
        }

        let len = data.len() as u64;
        if !self.file_active() && self.mem_bytes + len <= self.max_mem {
            self.mem_add(Bytes::copy_from_slice(data));
            return Ok(());
        }

        self.file_add(data)
    }

    /// Pop the oldest entry. Returns `Ok(None)` when both tiers are empty.
    ///
    /// # Errors
    ///
    /// `Corrupt` if the next disk record is truncated or misaligned.
    pub fn read(&mut self) -> Result<Option<Bytes>> {
        if !self.valid {
            return Ok(None);
        }
        if self.read_index < self.write_index {
            return Ok(self.mem_read());
        }
        self.file_read()
    }

    /// Put a just-read entry back at the head of the queue.
    ///
    /// An entry last read from disk is restored by rewinding the file.
    /// Otherwise it goes back into memory, which only works while the read
    /// cursor has room in front of it or the memory tier is empty.
    ///
    /// # Errors
    ///
    /// `Dropped` if the entry cannot be put back without breaking order.
    pub fn unread(&mut self, data: &[u8]) -> Result<()> {
        if !self.valid {
            return Err(BacklogError::Dropped);
        }
        if self.num_entries() == 0 {
            return self.add(data);
        }

        let len = data.len() as u64;
        if let Some(LastRead::File { len: last }) = self.last_read.take() {
            if last == len && self.file_active() && self.file_read_pos >= RECORD_PREFIX_SIZE + len
            {
                self.file_read_pos -= RECORD_PREFIX_SIZE + len;
                self.file_entries += 1;
                return Ok(());
            }
        }

        self.mem_unread(Bytes::copy_from_slice(data))
    }

    /// Total number of unread entries in both tiers.
    pub fn num_entries(&self) -> u64 {
        (self.write_index - self.read_index) as u64 + self.file_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries() == 0
    }

    /// Bytes waiting to be read in both tiers. Disk bytes include the
    /// record prefixes.
    pub fn available_bytes(&self) -> u64 {
        self.mem_bytes + self.file_size.saturating_sub(self.file_read_pos)
    }

    /// Payload bytes held in memory.
    pub fn mem_bytes(&self) -> u64 {
        self.mem_bytes
    }

    /// Bytes currently occupied on disk, prefixes included.
    pub fn file_bytes(&self) -> u64 {
        self.file_size
    }

    pub fn max_mem(&self) -> u64 {
        self.max_mem
    }

    pub fn max_file(&self) -> u64 {
        self.max_file
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether new entries currently go to disk.
    pub fn is_spilled(&self) -> bool {
        self.file_active()
    }

    /// Returns `true` exactly once per fill-up, so callers can warn about
    /// a full backlog without flooding the log. Rearmed by [`wipe`](Self::wipe).
    pub fn should_warn_if_full(&mut self) -> bool {
        !std::mem::replace(&mut self.warned_full, true)
    }

    /// Permanently disable the backlog and delete its file. Used when a
    /// record boundary on disk can no longer be trusted.
    pub fn invalidate(&mut self) {
        tracing::error!(
            "Invalidating backlog {}: {} entries lost",
            self.display_path(),
            self.num_entries()
        );
        self.reset_memory();
        self.release_file(true);
        self.valid = false;
    }

    /// Reset to a fresh, empty and valid state, keeping limits and path.
    /// Without `unlink` the data file is left on disk.
    pub fn wipe(&mut self, unlink: bool) {
        self.reset_memory();
        self.release_file(unlink);
        self.valid = true;
        self.warned_full = false;
    }

    /// Release the file handle. The file is reopened on the next access.
    pub fn close(&mut self) {
        self.file = None;
    }

    fn file_active(&self) -> bool {
        self.file.is_some() || self.file_size > 0
    }

    fn display_path(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(memory)".to_string())
    }

    fn mem_add(&mut self, data: Bytes) {
        if self.write_index >= self.cache.len() {
            let alloc = ((self.cache.len() + 16) * 3) / 2;
            self.cache.resize(alloc, None);
        }
        self.mem_bytes += data.len() as u64;
        self.cache[self.write_index] = Some(data);
        self.write_index += 1;
    }

    fn mem_read(&mut self) -> Option<Bytes> {
        let entry = self.cache[self.read_index].take();
        self.read_index += 1;
        if self.read_index >= self.write_index {
            self.read_index = 0;
            self.write_index = 0;
        }
        let entry = entry?;
        self.mem_bytes -= entry.len() as u64;
        self.last_read = Some(LastRead::Memory);
        Some(entry)
    }

    fn mem_unread(&mut self, data: Bytes) -> Result<()> {
        if self.read_index > 0 {
            self.read_index -= 1;
        } else if self.write_index == 0 {
            if self.cache.is_empty() {
                self.cache.resize(16, None);
            }
            self.write_index = 1;
        } else {
            return Err(BacklogError::Dropped);
        }

        self.mem_bytes += data.len() as u64;
        self.cache[self.read_index] = Some(data);
        Ok(())
    }

    fn file_add(&mut self, data: &[u8]) -> Result<()> {
        if self.path.is_none() {
            return Err(BacklogError::NoPath);
        }

        let len = data.len() as u64;
        if self.file_payload + len > self.max_file || len > u32::MAX as u64 {
            return Err(BacklogError::NoSpace {
                needed: len,
                limit: self.max_file,
            });
        }

        if !self.file_active() {
            tracing::debug!(
                "Backlog {} exceeds memory budget ({} of {} bytes), spilling to disk",
                self.display_path(),
                self.mem_bytes + len,
                self.max_mem
            );
        }

        let mut record = Vec::with_capacity(RECORD_PREFIX_SIZE as usize + data.len());
        record.extend_from_slice(&(len as u32).to_le_bytes());
        record.extend_from_slice(data);

        let offset = self.file_size;
        let file = match self.open_file() {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(
                    "Failed to open backlog file {}: {}",
                    self.display_path(),
                    e
                );
                return Err(BacklogError::Io(e));
            }
        };
        // past this point the file may hold part of a record
        let written = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(&record));
        if let Err(e) = written {
            tracing::error!("Failed to write backlog record: {}", e);
            self.invalidate();
            return Err(BacklogError::Incomplete);
        }

        self.file_size += record.len() as u64;
        self.file_payload += len;
        self.file_entries += 1;
        Ok(())
    }

    fn file_read(&mut self) -> Result<Option<Bytes>> {
        if !self.file_active() {
            return Ok(None);
        }
        if self.file_read_pos >= self.file_size {
            self.release_file(true);
            return Ok(None);
        }

        let pos = self.file_read_pos;
        let file_size = self.file_size;
        let file = self.open_file()?;
        file.seek(SeekFrom::Start(pos))?;

        let mut prefix = [0u8; RECORD_PREFIX_SIZE as usize];
        file.read_exact(&mut prefix).map_err(corrupt_on_eof)?;
        let len = u32::from_le_bytes(prefix) as u64;
        if pos + RECORD_PREFIX_SIZE + len > file_size {
            return Err(BacklogError::Corrupt(format!(
                "record at offset {} claims {} bytes, only {} left",
                pos,
                len,
                file_size - pos - RECORD_PREFIX_SIZE
            )));
        }

        let mut data = vec![0u8; len as usize];
        file.read_exact(&mut data).map_err(corrupt_on_eof)?;

        self.file_read_pos += RECORD_PREFIX_SIZE + len;
        self.file_entries = self.file_entries.saturating_sub(1);
        self.last_read = Some(LastRead::File { len });

        if self.file_read_pos >= self.file_size {
            self.release_file(true);
        }
        Ok(Some(Bytes::from(data)))
    }

    fn open_file(&mut self) -> io::Result<&mut File> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "backlog has no path"))?;

        if self.file.is_none() {
            let fresh = self.file_size == 0;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(fresh)
                .open(path)?;
            self.file = Some(file);
        }

        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "backlog file not open"))
    }

    fn reset_memory(&mut self) {
        self.cache.clear();
        self.read_index = 0;
        self.write_index = 0;
        self.mem_bytes = 0;
        self.last_read = None;
    }

    fn release_file(&mut self, unlink: bool) {
        self.file = None;
        if unlink && self.file_size > 0 {
            if let Some(path) = &self.path {
                if let Err(e) = remove_if_exists(path) {
                    tracing::warn!("Failed to unlink backlog file {}: {}", path.display(), e);
                }
            }
        }
        self.file_size = 0;
        self.file_read_pos = 0;
        self.file_entries = 0;
        self.file_payload = 0;
    }
}

impl Drop for Backlog {
    fn drop(&mut self) {
        self.release_file(true);
    }
}

fn corrupt_on_eof(e: io::Error) -> BacklogError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        BacklogError::Corrupt("truncated record".to_string())
    } else {
        BacklogError::Io(e)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8, len: usize) -> Vec<u8> {
        vec![tag; len]
    }

    fn backlog(dir: &tempfile::TempDir, max_mem: u64, max_file: u64) -> Backlog {
        Backlog::create(Some(dir.path().join("test.binlog")), max_mem, max_file, true).unwrap()
    }

    #[test]
    fn test_memory_only_fifo() {
        let mut bl = Backlog::create(None, 1 << 20, 0, false).unwrap();
        for i in 0..100u8 {
            bl.add(&entry(i, 10 + i as usize)).unwrap();
        }
        assert_eq!(bl.num_entries(), 100);
        for i in 0..100u8 {
            assert_eq!(bl.read().unwrap().unwrap(), entry(i, 10 + i as usize));
        }
        assert!(bl.read().unwrap().is_none());
        assert_eq!(bl.mem_bytes(), 0);
    }

    #[test]
    fn test_spill_determinism() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 100, 1000);

        bl.add(&entry(b'A', 40)).unwrap();
        bl.add(&entry(b'B', 40)).unwrap();
        assert!(!bl.is_spilled());
        assert_eq!(bl.mem_bytes(), 80);

        bl.add(&entry(b'C', 40)).unwrap();
        assert!(bl.is_spilled());
        assert_eq!(bl.mem_bytes(), 80);
        assert_eq!(bl.file_bytes(), 44);

        assert_eq!(bl.read().unwrap().unwrap(), entry(b'A', 40));
        assert_eq!(bl.read().unwrap().unwrap(), entry(b'B', 40));
        assert!(bl.is_spilled());
        assert_eq!(bl.read().unwrap().unwrap(), entry(b'C', 40));
        assert!(!bl.is_spilled());
        assert!(bl.read().unwrap().is_none());
    }

    #[test]
    fn test_no_memory_entries_behind_disk_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 100, 10_000);

        bl.add(&entry(1, 90)).unwrap();
        bl.add(&entry(2, 50)).unwrap(); // spills
        bl.add(&entry(3, 5)).unwrap(); // would fit in memory, must not
        assert_eq!(bl.mem_bytes(), 90);

        assert_eq!(bl.read().unwrap().unwrap()[0], 1);
        assert_eq!(bl.read().unwrap().unwrap()[0], 2);
        assert_eq!(bl.read().unwrap().unwrap()[0], 3);
    }

    #[test]
    fn test_reverts_to_memory_after_file_drained() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        let mut bl = backlog(&dir, 10, 1000);

        bl.add(&entry(1, 20)).unwrap();
        assert!(path.exists());
        assert_eq!(bl.read().unwrap().unwrap(), entry(1, 20));
        assert!(!path.exists());

        bl.add(&entry(2, 5)).unwrap();
        assert!(!bl.is_spilled());
        assert_eq!(bl.read().unwrap().unwrap(), entry(2, 5));
    }

    #[test]
    fn test_file_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 0, 100);

        bl.add(&entry(1, 60)).unwrap();
        let err = bl.add(&entry(2, 60)).unwrap_err();
        assert!(matches!(err, BacklogError::NoSpace { needed: 60, limit: 100 }));
        bl.add(&entry(3, 40)).unwrap();
        assert_eq!(bl.num_entries(), 2);
    }

    #[test]
    fn test_memory_only_refuses_spill() {
        let mut bl = Backlog::create(None, 10, 1000, false).unwrap();
        assert!(matches!(bl.add(&entry(1, 11)), Err(BacklogError::NoPath)));
    }

    #[test]
    fn test_full_warning_once() {
        let mut bl = Backlog::create(None, 10, 0, false).unwrap();
        assert!(bl.should_warn_if_full());
        assert!(!bl.should_warn_if_full());
        bl.wipe(true);
        assert!(bl.should_warn_if_full());
    }

    #[test]
    fn test_unread_from_memory() {
        let mut bl = Backlog::create(None, 1000, 0, false).unwrap();
        bl.add(b"first").unwrap();
        bl.add(b"second").unwrap();

        let first = bl.read().unwrap().unwrap();
        bl.unread(&first).unwrap();
        assert_eq!(bl.num_entries(), 2);
        assert_eq!(bl.read().unwrap().unwrap(), &b"first"[..]);
        assert_eq!(bl.read().unwrap().unwrap(), &b"second"[..]);
    }

    #[test]
    fn test_unread_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 0, 1000);
        bl.add(b"one").unwrap();
        bl.add(b"two").unwrap();

        let one = bl.read().unwrap().unwrap();
        bl.unread(&one).unwrap();
        assert_eq!(bl.num_entries(), 2);
        assert_eq!(bl.read().unwrap().unwrap(), &b"one"[..]);
        assert_eq!(bl.read().unwrap().unwrap(), &b"two"[..]);
        assert!(bl.read().unwrap().is_none());
    }

    #[test]
    fn test_unread_into_empty_backlog_adds() {
        let mut bl = Backlog::create(None, 1000, 0, false).unwrap();
        bl.add(b"only").unwrap();
        let only = bl.read().unwrap().unwrap();
        assert!(bl.is_empty());
        bl.unread(&only).unwrap();
        assert_eq!(bl.read().unwrap().unwrap(), &b"only"[..]);
    }

    #[test]
    fn test_unread_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 100, 1000);
        bl.add(&entry(b'A', 40)).unwrap();
        bl.add(&entry(b'B', 40)).unwrap();
        bl.add(&entry(b'C', 40)).unwrap();
        bl.add(&entry(b'D', 40)).unwrap();

        let a = bl.read().unwrap().unwrap();
        let b = bl.read().unwrap().unwrap();
        let c = bl.read().unwrap().unwrap();

        // file rewind, then one memory reinsertion, then refusal
        bl.unread(&c).unwrap();
        bl.unread(&b).unwrap();
        assert!(matches!(bl.unread(&a), Err(BacklogError::Dropped)));

        assert_eq!(bl.read().unwrap().unwrap(), b);
        assert_eq!(bl.read().unwrap().unwrap(), c);
        assert_eq!(bl.read().unwrap().unwrap(), entry(b'D', 40));
        assert!(bl.read().unwrap().is_none());
    }

    #[test]
    fn test_second_memory_unread_refused() {
        let mut bl = Backlog::create(None, 1000, 0, false).unwrap();
        bl.add(b"a").unwrap();
        bl.add(b"b").unwrap();
        let a = bl.read().unwrap().unwrap();
        bl.unread(&a).unwrap();
        assert!(matches!(bl.unread(b"z"), Err(BacklogError::Dropped)));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        let mut bl = backlog(&dir, 0, 1000);
        bl.add(&entry(1, 30)).unwrap();
        bl.add(&entry(2, 30)).unwrap();
        bl.close();

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(50).unwrap();

        assert_eq!(bl.read().unwrap().unwrap(), entry(1, 30));
        assert!(matches!(bl.read(), Err(BacklogError::Corrupt(_))));
    }

    #[test]
    fn test_open_failure_keeps_memory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("test.binlog");
        let mut bl = Backlog::create(Some(path.clone()), 100, 1000, false).unwrap();
        bl.add(&entry(1, 40)).unwrap();
        bl.add(&entry(2, 40)).unwrap();

        assert!(matches!(bl.add(&entry(3, 40)), Err(BacklogError::Io(_))));
        assert!(bl.is_valid());
        assert!(!bl.is_spilled());
        assert!(!path.exists());
        assert_eq!(bl.num_entries(), 2);
        assert_eq!(bl.read().unwrap().unwrap(), entry(1, 40));
        assert_eq!(bl.read().unwrap().unwrap(), entry(2, 40));
        assert!(bl.read().unwrap().is_none());
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 0, 1000);
        bl.add(b"before").unwrap();
        bl.close();
        bl.add(b"after").unwrap();
        assert_eq!(bl.read().unwrap().unwrap(), &b"before"[..]);
        assert_eq!(bl.read().unwrap().unwrap(), &b"after"[..]);
    }

    #[test]
    fn test_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        let mut bl = backlog(&dir, 10, 1000);
        bl.add(&entry(1, 5)).unwrap();
        bl.add(&entry(2, 50)).unwrap();
        assert!(path.exists());

        bl.invalidate();
        assert!(!bl.is_valid());
        assert!(!path.exists());
        assert_eq!(bl.num_entries(), 0);
        assert!(matches!(bl.add(b"x"), Err(BacklogError::Invalidated)));
        assert!(bl.read().unwrap().is_none());

        bl.wipe(true);
        assert!(bl.is_valid());
        bl.add(b"x").unwrap();
    }

    #[test]
    fn test_wipe_keeps_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        let mut bl = backlog(&dir, 10, 1000);
        bl.add(&entry(1, 50)).unwrap();
        bl.wipe(true);

        assert!(bl.is_empty());
        assert_eq!(bl.available_bytes(), 0);
        assert!(!path.exists());
        assert_eq!(bl.max_mem(), 10);
        assert_eq!(bl.max_file(), 1000);
    }

    #[test]
    fn test_wipe_without_unlink_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        let mut bl = backlog(&dir, 0, 1000);
        bl.add(b"keep").unwrap();
        bl.wipe(false);
        assert!(path.exists());
        assert!(bl.is_empty());
    }

    #[test]
    fn test_available_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut bl = backlog(&dir, 10, 1000);
        bl.add(&entry(1, 8)).unwrap();
        bl.add(&entry(2, 20)).unwrap();
        assert_eq!(bl.available_bytes(), 8 + 4 + 20);
        bl.read().unwrap();
        assert_eq!(bl.available_bytes(), 24);
    }

    #[test]
    fn test_create_unlinks_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        fs::write(&path, b"stale").unwrap();
        let _bl = Backlog::create(Some(path.clone()), 0, 10, true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.binlog");
        {
            let mut bl = backlog(&dir, 0, 1000);
            bl.add(b"gone").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}

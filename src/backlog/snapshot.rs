//! Persisting a backlog across a process restart.
//!
//! [`Backlog::save`] compacts all unread entries into `<path>.save` and
//! writes the control fields to `<path>.meta` as versioned JSON. Both files
//! are written to a temporary name, synced and renamed into place.
//! [`Backlog::restore`] consumes the pair exactly once.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{remove_if_exists, Backlog, RECORD_PREFIX_SIZE};
use crate::error::BacklogError;
use crate::protocol::Timestamp;

/// Version of the metadata layout.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Control fields of a saved backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub format: u32,
    pub entries: u64,
    /// Size of the `.save` file, record prefixes included.
    pub file_size: u64,
    pub payload_bytes: u64,
    pub max_mem: u64,
    pub max_file: u64,
    pub saved_at: i64,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn meta_path(path: &Path) -> PathBuf {
    sibling(path, ".meta")
}

pub(crate) fn save_path(path: &Path) -> PathBuf {
    sibling(path, ".save")
}

fn write_atomically(path: &Path, f: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let tmp = sibling(path, ".tmp");
    let result = (|| {
        let mut file = File::create(&tmp)?;
        f(&mut file)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

impl Backlog {
    /// Persist all unread entries next to the backlog path and empty the
    /// backlog. Returns the path of the saved data file, or `None` when
    /// there was nothing to save.
    ///
    /// # Errors
    ///
    /// `NoPath` for a memory-only backlog, or any I/O error while writing.
    /// On error the backlog itself is left untouched.
    pub fn save(&mut self) -> Result<Option<PathBuf>, BacklogError> {
        let path = self.path.clone().ok_or(BacklogError::NoPath)?;
        if !self.valid || self.is_empty() {
            return Ok(None);
        }

        let data_path = save_path(&path);
        let memory: Vec<_> = self.cache[self.read_index..self.write_index]
            .iter()
            .flatten()
            .cloned()
            .collect();
        let tail_start = self.file_read_pos;
        let tail_len = self.file_size.saturating_sub(self.file_read_pos);
        let tail_entries = self.file_entries;
        let mut source = if tail_len > 0 {
            Some(self.open_file()?)
        } else {
            None
        };

        write_atomically(&data_path, |out| {
            for entry in &memory {
                out.write_all(&(entry.len() as u32).to_le_bytes())?;
                out.write_all(entry)?;
            }
            if let Some(file) = source.as_mut() {
                file.seek(SeekFrom::Start(tail_start))?;
                io::copy(&mut (&mut **file).take(tail_len), out)?;
            }
            Ok(())
        })?;

        let mem_payload: u64 = memory.iter().map(|e| e.len() as u64).sum();
        let entries = memory.len() as u64 + tail_entries;
        let file_size = mem_payload + memory.len() as u64 * RECORD_PREFIX_SIZE + tail_len;
        let payload_bytes = file_size - entries * RECORD_PREFIX_SIZE;

        let meta = SnapshotMeta {
            format: SNAPSHOT_FORMAT,
            entries,
            file_size,
            payload_bytes,
            max_mem: self.max_mem,
            max_file: self.max_file,
            saved_at: Timestamp::now().sec,
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        write_atomically(&meta_path(&path), |out| out.write_all(&json))?;

        tracing::info!(
            "Saved backlog {} ({} entries, {} bytes) to {}",
            path.display(),
            entries,
            file_size,
            data_path.display()
        );
        self.wipe(true);
        Ok(Some(data_path))
    }

    /// Restore a backlog saved with [`save`](Self::save).
    ///
    /// Returns `Ok(None)` when no complete snapshot exists. A metadata file
    /// without its data file is deleted. The data is moved back to `path`
    /// and the metadata file is deleted once read.
    ///
    /// # Errors
    ///
    /// A snapshot that cannot be parsed or does not match its data file is
    /// deleted and reported as `Snapshot` or `Corrupt`.
    pub fn restore(path: impl Into<PathBuf>) -> Result<Option<Self>, BacklogError> {
        let path = path.into();
        let meta_file = meta_path(&path);
        let data_file = save_path(&path);

        if !meta_file.exists() {
            return Ok(None);
        }
        if !data_file.exists() {
            tracing::warn!(
                "Backlog metadata {} has no data file, removing it",
                meta_file.display()
            );
            remove_if_exists(&meta_file)?;
            return Ok(None);
        }

        let meta = match read_meta(&meta_file, &data_file) {
            Ok(meta) => meta,
            Err(e) => {
                remove_if_exists(&meta_file)?;
                remove_if_exists(&data_file)?;
                return Err(e);
            }
        };

        fs::rename(&data_file, &path)?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        remove_if_exists(&meta_file)?;

        let mut backlog = Backlog::create(Some(path), meta.max_mem, meta.max_file, false)?;
        backlog.file = Some(file);
        backlog.file_size = meta.file_size;
        backlog.file_entries = meta.entries;
        backlog.file_payload = meta.payload_bytes;

        tracing::info!(
            "Restored backlog {} with {} entries",
            backlog.display_path(),
            meta.entries
        );
        Ok(Some(backlog))
    }
}

fn read_meta(meta_file: &Path, data_file: &Path) -> Result<SnapshotMeta, BacklogError> {
    let raw = fs::read(meta_file)?;
    let meta: SnapshotMeta = serde_json::from_slice(&raw)?;
    if meta.format != SNAPSHOT_FORMAT {
        return Err(BacklogError::Corrupt(format!(
            "unsupported snapshot format {}",
            meta.format
        )));
    }
    let actual = fs::metadata(data_file)?.len();
    if actual != meta.file_size {
        return Err(BacklogError::Corrupt(format!(
            "saved data is {} bytes, metadata says {}",
            actual, meta.file_size
        )));
    }
    Ok(meta)
}

//! String blob persistence with file locking.
//!
//! The store persists its value set as one string blob under a fixed key.
//! Two backends are provided: a directory of files (one per key) and a
//! shared in-memory map.

use crate::{Error, Result};
use fs2::FileExt;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::NamedTempFile;

/// Key/value storage for string blobs
pub trait BlobStore {
    /// Read the blob stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Stores each key as `<dir>/<key>.json`
#[derive(Clone, Debug)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(Error::Other(format!("Invalid blob key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl BlobStore for FileBlobStore {
    /// Read with a shared lock. A missing file reads as `None`, a file that
    /// is not UTF-8 as [`Error::PersistedStateCorrupt`].
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            tracing::debug!("No blob file at {:?}", path);
            return Ok(None);
        }

        let file = File::open(&path)?;
        file.lock_shared()?;

        let mut bytes = Vec::new();
        let read = std::io::BufReader::new(&file).read_to_end(&mut bytes);
        file.unlock()?;
        read?;

        tracing::debug!("Read blob {:?} ({} bytes)", key, bytes.len());
        let contents = String::from_utf8(bytes).map_err(|e| Error::PersistedStateCorrupt {
            key: key.to_string(),
            source: Box::new(e),
        })?;
        Ok(Some(contents))
    }

    /// Atomically replace the file by writing a locked temp file, syncing it,
    /// and renaming it over the original.
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let temp = NamedTempFile::new_in(&self.dir)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            writer.write_all(value.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Wrote blob {:?} to {:?}", key, path);
        Ok(())
    }
}

/// In-memory blob map. Clones share the same contents, so a test can keep a
/// handle while the store owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Rc<RefCell<HashMap<String, String>>>,
    fail_writes: Rc<Cell<bool>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail, as a full or disabled storage would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.get() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "storage quota exceeded",
            )));
        }
        self.blobs.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Default location of the state blobs inside a data directory
pub fn state_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("state")
}

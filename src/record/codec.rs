//! Record Codec
//!
//! One pretty-printed JSON file per record, sharded by the first two
//! characters of the id:
//!
//! ```text
//! records/
//!   ├── ac/
//!   │   ├── acme-001.json
//!   │   └── acme-002.json
//!   └── b7/
//!       └── b7e2....json
//! ```
//!
//! Writes go to a hidden temp file in the shard directory and are renamed
//! over the target, so readers see either the old or the new record, never
//! a partial one.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde_json::Value;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::StockroomError;

use super::{validate_id, ID_FIELD};

const RECORD_EXT: &str = "json";
const TEMP_MARKER: &str = ".tmp-";

/// File-per-record storage
#[derive(Debug)]
pub struct RecordStore {
    /// Root of the sharded record tree
    root: PathBuf,

    /// fsync policy
    sync: SyncStrategy,
}

impl RecordStore {
    /// Open or create the record tree at `root`
    pub fn open(root: &Path, sync: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            sync,
        })
    }

    /// Serialize and atomically write a record
    pub fn write(&self, id: &str, doc: &Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.write_bytes(id, &bytes)
    }

    /// Atomically write raw record bytes (used to restore pre-images)
    pub fn write_bytes(&self, id: &str, bytes: &[u8]) -> Result<()> {
        validate_id(id)?;
        let path = self.path_for(id);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard)?;
        }
        atomic_write(&path, bytes, self.sync)
    }

    /// Read and decode a record
    ///
    /// Missing or unreadable files are `NotFound`; files that do not parse
    /// as a JSON object carrying the right id are `CorruptRecord`.
    pub fn read(&self, id: &str) -> Result<Value> {
        let bytes = self
            .read_bytes(id)?
            .ok_or_else(|| StockroomError::NotFound(id.to_string()))?;
        decode(id, &bytes)
    }

    /// Read raw record bytes, `None` when the record does not exist
    pub fn read_bytes(&self, id: &str) -> Result<Option<Bytes>> {
        validate_id(id).map_err(|_| StockroomError::NotFound(id.to_string()))?;
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a record; `NotFound` if it does not exist
    pub fn delete(&self, id: &str) -> Result<()> {
        validate_id(id).map_err(|_| StockroomError::NotFound(id.to_string()))?;
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StockroomError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        if self.sync == SyncStrategy::EveryWrite {
            if let Some(shard) = path.parent() {
                sync_dir(shard)?;
            }
        }
        Ok(())
    }

    /// Delete a record if present (rollback of a fresh insert)
    pub fn remove_if_present(&self, id: &str) -> Result<()> {
        match self.delete(id) {
            Err(StockroomError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Whether a record file exists for `id`
    pub fn exists(&self, id: &str) -> bool {
        validate_id(id).is_ok() && self.path_for(id).is_file()
    }

    /// All record ids on disk, sorted
    pub fn scan_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard)? {
                let path = entry?.path();
                if let Some(id) = Self::parse_record_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Number of record files on disk
    pub fn count(&self) -> Result<usize> {
        Ok(self.scan_ids()?.len())
    }

    /// Remove temp files left behind by writers that died mid-write
    pub fn sweep_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard)? {
                let path = entry?.path();
                let is_temp = path
                    .file_name()
                    .map(|n| is_temp_name(&n.to_string_lossy()))
                    .unwrap_or(false);
                if is_temp && path.is_file() {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Move a record file out of the tree (corrupt record handling)
    pub fn quarantine(&self, id: &str, dest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(format!("{}.{}", id, RECORD_EXT));
        fs::rename(self.path_for(id), &dest)?;
        Ok(dest)
    }

    /// Path of the file backing `id`
    pub fn path_for(&self, id: &str) -> PathBuf {
        let shard: String = id.chars().take(2).collect();
        self.root.join(shard).join(format!("{}.{}", id, RECORD_EXT))
    }

    /// Root of the record tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// "acme-001.json" → Some("acme-001"); temp files and strays → None
    fn parse_record_id(path: &Path) -> Option<String> {
        if !path.is_file() || path.extension()? != RECORD_EXT {
            return None;
        }
        let id = path.file_stem()?.to_str()?;
        validate_id(id).ok()?;
        Some(id.to_string())
    }
}

/// Names produced by `atomic_write`: `.<target>.tmp-<uuid>`
///
/// The leading dot can never start a valid id, so record files whose id
/// merely contains the marker are left alone.
fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

fn decode(id: &str, bytes: &[u8]) -> Result<Value> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| StockroomError::corrupt(id, e))?;
    match doc.get(ID_FIELD) {
        Some(Value::String(stored)) if stored == id => Ok(doc),
        Some(other) => Err(StockroomError::corrupt(
            id,
            format!("stored id {} does not match file name", other),
        )),
        None if doc.is_object() => Err(StockroomError::corrupt(id, "record has no id")),
        None => Err(StockroomError::corrupt(id, "record is not a JSON object")),
    }
}

// =============================================================================
// Atomic File Replacement
// =============================================================================

/// Write `bytes` to `path` via temp file + rename
pub(crate) fn atomic_write(path: &Path, bytes: &[u8], sync: SyncStrategy) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StockroomError::Config(format!("{} has no parent", path.display())))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}{}{}", name, TEMP_MARKER, uuid::Uuid::new_v4().simple()));

    let written = (|| -> std::io::Result<()> {
        {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(bytes)?;
            if sync == SyncStrategy::EveryWrite {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(e.into());
    }

    if sync == SyncStrategy::EveryWrite {
        sync_dir(dir)?;
    }
    Ok(())
}

/// fsync a directory so renames and unlinks inside it are durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

//! Persistence of session snapshots as JSON documents.
//!
//! Each session maps to one file, `<dir>/session_<id>.json`, which is fully
//! replaced on every save. The document is written to a temporary sibling
//! and renamed over the target so a reader sees either the previous snapshot
//! or the new one, never a partial write.

use crate::error::SessionError;
use kuber_types::SessionRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Writes a session snapshot to durable storage.
///
/// Implementations are called from the blocking thread pool and may perform
/// synchronous I/O.
pub trait SessionWriter: Send + Sync {
    /// Persists `record` for `session_id`, returning where it was written.
    fn write(&self, session_id: &str, record: &SessionRecord) -> Result<PathBuf, SessionError>;
}

/// Writes sessions as pretty-printed JSON files in a directory.
#[derive(Debug)]
pub struct JsonFileWriter {
    dir: PathBuf,
    tmp_counter: AtomicU64,
}

impl JsonFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path for a session id.
    ///
    /// Session ids arrive from model-issued tool calls, so they are escaped
    /// to keep the file inside `dir`. `[A-Za-z0-9-]` is kept, `_` becomes
    /// `__` and every other byte becomes `_xx` (lowercase hex). The mapping is
    /// one-to-one: distinct ids never share a file.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("session_{}.json", escape_file_stem(session_id)))
    }
}

impl SessionWriter for JsonFileWriter {
    fn write(&self, session_id: &str, record: &SessionRecord) -> Result<PathBuf, SessionError> {
        fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(session_id);
        let body = serde_json::to_vec_pretty(record)?;

        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("json.{seq}.tmp"));

        fs::write(&tmp_path, &body).map_err(|source| SessionError::Io {
            path: tmp_path.clone(),
            source,
        })?;

        if let Err(source) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(SessionError::Io { path, source });
        }

        Ok(path)
    }
}

fn escape_file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        match byte {
            b'_' => stem.push_str("__"),
            b if b.is_ascii_alphanumeric() || b == b'-' => stem.push(char::from(b)),
            b => stem.push_str(&format!("_{b:02x}")),
        }
    }
    stem
}

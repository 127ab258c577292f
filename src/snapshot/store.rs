//! In-memory snapshot store
//!
//! Snapshots are shared behind `Arc`, so a write is a single pointer swap
//! under the lock and readers keep whatever version they already hold.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::{decoder, DecodeError, Snapshot};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    entries: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the snapshot stored under `key`
    pub fn put(&self, key: impl Into<String>, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        self.entries.write().insert(key.into(), snapshot);
    }

    pub fn get(&self, key: &str) -> Option<Arc<Snapshot>> {
        self.entries.read().get(key).cloned()
    }

    /// Point-in-time copy of every entry
    pub fn get_all(&self) -> HashMap<String, Arc<Snapshot>> {
        self.entries.read().clone()
    }

    /// Base file names of every stored key, sorted
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .keys()
            .map(|key| base_name(key).to_string())
            .collect();
        names.sort();
        names
    }

    /// Find a snapshot by its base file name
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Snapshot>> {
        let key = self
            .entries
            .read()
            .keys()
            .find(|key| base_name(key) == name)
            .cloned()?;
        self.get(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Read, decode and store one snapshot file, keyed by its path.
    ///
    /// Nothing is stored when decoding fails; a previously loaded version of
    /// the same file stays in place.
    pub fn load_file(&self, path: &Path) -> Result<usize, LoadError> {
        let key = path.to_string_lossy().into_owned();

        let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
            path: key.clone(),
            source,
        })?;
        let snapshot = decoder::decode(&bytes).map_err(|source| LoadError::Decode {
            path: key.clone(),
            source,
        })?;

        let rows = snapshot.len();
        match snapshot.captured_at() {
            Some(at) => info!(
                "Loaded and cached: {} ({} rows, captured {})",
                base_name(&key),
                rows,
                at
            ),
            None => info!("Loaded and cached: {} ({} rows)", base_name(&key), rows),
        }
        self.put(key, snapshot);
        Ok(rows)
    }
}

fn base_name(key: &str) -> &str {
    Path::new(key)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(key)
}

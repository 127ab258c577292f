//! Data directory scanner
//!
//! Tracks the SHA-256 of every `*.db.gz` file and reloads files whose
//! content changed since the previous scan.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::snapshot::{SnapshotStore, SNAPSHOT_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub hash: String,
    pub kind: ChangeKind,
}

impl FileChange {
    fn short_hash(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

#[derive(Debug)]
pub struct Scanner {
    data_dir: PathBuf,
    files: HashMap<PathBuf, String>,
}

impl Scanner {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            files: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Hash every snapshot file and report the ones that are new or changed.
    ///
    /// Fails only when the directory itself cannot be listed. Files that
    /// cannot be hashed are skipped until a later scan.
    pub fn scan(&mut self) -> io::Result<Vec<FileChange>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.data_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.ends_with(SNAPSHOT_SUFFIX))
            })
            .collect();
        paths.sort();

        let mut changes = Vec::new();
        for path in paths {
            let hash = match file_hash(&path) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Failed to hash {}: {}", path.display(), e);
                    continue;
                }
            };

            let kind = match self.files.get(&path) {
                None => ChangeKind::New,
                Some(previous) if *previous != hash => ChangeKind::Modified,
                Some(_) => continue,
            };
            self.files.insert(path.clone(), hash.clone());
            changes.push(FileChange { path, hash, kind });
        }
        Ok(changes)
    }

    /// Number of files seen so far
    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.files.len()
    }
}

/// Hex SHA-256 of a file's contents
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Scan once and load every changed file into the store
pub fn sync(scanner: &mut Scanner, store: &SnapshotStore) -> io::Result<usize> {
    let changes = scanner.scan()?;
    for change in &changes {
        match change.kind {
            ChangeKind::New => info!(
                "New file detected: {} (hash: {})",
                change.path.display(),
                change.short_hash()
            ),
            ChangeKind::Modified => info!(
                "File modified: {} (new hash: {})",
                change.path.display(),
                change.short_hash()
            ),
        }
        if let Err(e) = store.load_file(&change.path) {
            error!("Error loading {}: {}", change.path.display(), e);
        }
    }
    Ok(changes.len())
}

/// Start the periodic scan task.
///
/// The first tick fires one `interval` from now; the caller is expected to
/// have run the initial scan already.
pub fn start_scanner(scanner: Scanner, store: Arc<SnapshotStore>, interval: Duration) {
    tokio::spawn(scan_task(scanner, store, interval));
}

async fn scan_task(mut scanner: Scanner, store: Arc<SnapshotStore>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        "Scanner started (dir={}, interval={:?})",
        scanner.data_dir().display(),
        interval
    );

    loop {
        ticker.tick().await;

        let task_store = store.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = sync(&mut scanner, &task_store);
            (scanner, result)
        })
        .await;

        match joined {
            Ok((returned, result)) => {
                scanner = returned;
                if let Err(e) = result {
                    error!("Scan error: {}", e);
                }
            }
            Err(e) => {
                error!("Scan task failed: {}", e);
                break;
            }
        }
    }
}

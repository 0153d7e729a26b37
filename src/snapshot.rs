//! Version history storage.
//!
//! A snapshot is an immutable copy of a node's content at one version, taken just before that
//! version is overwritten. [SnapshotStore] is the seam the tree manager talks to; the bundled
//! [FileSnapshotStore] keeps each node's history under `<project>/.history/<node_id>/`:
//!
//! ```text
//! .history/doc_1234/
//!   1.md
//!   2.md
//!   snapshots.json   # [SnapshotMeta] list, newest version first
//! ```
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    error::DocTreeError,
    fsutil::{remove_if_exists, write_atomic, write_json_atomic},
};

pub const HISTORY_DIR: &str = ".history";
const SNAPSHOT_INDEX_FILE: &str = "snapshots.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size: u64,
}

pub trait SnapshotStore: Debug + Send + Sync {
    /// Store `content` as `version` of `node_id`, replacing any earlier snapshot of that version.
    fn create_snapshot(&self, node_id: &str, version: u64, content: &str)
        -> Result<(), DocTreeError>;

    /// Snapshots newest first. `limit == 0` means no limit. A node without history yields an
    /// empty list.
    fn list_snapshots(&self, node_id: &str, limit: usize)
        -> Result<Vec<SnapshotMeta>, DocTreeError>;

    fn get_snapshot(&self, node_id: &str, version: u64) -> Result<String, DocTreeError>;

    /// Keep the newest `keep` snapshots and delete the rest.
    fn cleanup(&self, node_id: &str, keep: usize) -> Result<(), DocTreeError>;

    /// Drop the whole history of a deleted node.
    fn purge(&self, _node_id: &str) -> Result<(), DocTreeError> {
        Ok(())
    }
}

/// Every read-modify-write of a `snapshots.json` happens under `index_lock`. Clones share it.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
    index_lock: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        FileSnapshotStore {
            base_dir: project_dir.as_ref().to_path_buf(),
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    fn history_dir(&self, node_id: &str) -> PathBuf {
        self.base_dir.join(HISTORY_DIR).join(node_id)
    }

    fn snapshot_path(&self, node_id: &str, version: u64) -> PathBuf {
        self.history_dir(node_id).join(format!("{version}.md"))
    }

    fn index_path(&self, node_id: &str) -> PathBuf {
        self.history_dir(node_id).join(SNAPSHOT_INDEX_FILE)
    }

    fn load_index(&self, node_id: &str) -> Result<Option<Vec<SnapshotMeta>>, DocTreeError> {
        let path = self.index_path(node_id);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let snapshots = serde_json::from_str(&text).map_err(|e| {
                    DocTreeError::Serialization(format!(
                        "failed to parse snapshot index {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Some(snapshots))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DocTreeError::Io(format!(
                "failed to load snapshot index {}: {e}",
                path.display()
            ))),
        }
    }

    fn save_index(&self, node_id: &str, snapshots: &[SnapshotMeta]) -> Result<(), DocTreeError> {
        write_json_atomic(self.index_path(node_id), &snapshots)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create_snapshot(
        &self,
        node_id: &str,
        version: u64,
        content: &str,
    ) -> Result<(), DocTreeError> {
        let history_dir = self.history_dir(node_id);
        fs::create_dir_all(&history_dir).map_err(|e| {
            DocTreeError::Io(format!(
                "failed to create history directory {}: {e}",
                history_dir.display()
            ))
        })?;

        let path = self.snapshot_path(node_id, version);
        let _guard = self.index_lock.lock();
        write_atomic(&path, content.as_bytes())?;

        // An unreadable index is replaced rather than blocking new history.
        let mut snapshots = match self.load_index(node_id) {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("[SnapshotStore] resetting snapshot index for {node_id}: {e}");
                Vec::new()
            }
        };
        snapshots.retain(|snap| snap.version != version);
        snapshots.push(SnapshotMeta {
            version,
            created_at: Utc::now(),
            path,
            size: content.len() as u64,
        });
        snapshots.sort_by(|a, b| b.version.cmp(&a.version));
        self.save_index(node_id, &snapshots)?;
        tracing::debug!("[SnapshotStore] stored version {version} of {node_id}");
        Ok(())
    }

    fn list_snapshots(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<SnapshotMeta>, DocTreeError> {
        let mut snapshots = self.load_index(node_id)?.unwrap_or_default();
        if limit > 0 {
            snapshots.truncate(limit);
        }
        Ok(snapshots)
    }

    fn get_snapshot(&self, node_id: &str, version: u64) -> Result<String, DocTreeError> {
        let path = self.snapshot_path(node_id, version);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DocTreeError::SnapshotNotFound {
                node_id: node_id.to_string(),
                version,
            }),
            Err(e) => Err(DocTreeError::Io(format!(
                "failed to read snapshot {}: {e}",
                path.display()
            ))),
        }
    }

    fn cleanup(&self, node_id: &str, keep: usize) -> Result<(), DocTreeError> {
        let _guard = self.index_lock.lock();
        let Some(mut snapshots) = self.load_index(node_id)? else {
            return Ok(());
        };
        if snapshots.len() <= keep {
            return Ok(());
        }
        for snap in snapshots.split_off(keep) {
            remove_if_exists(&snap.path).map_err(|e| {
                DocTreeError::Io(format!(
                    "failed to delete snapshot file {}: {e}",
                    snap.path.display()
                ))
            })?;
        }
        self.save_index(node_id, &snapshots)?;
        tracing::debug!("[SnapshotStore] pruned history of {node_id} to {keep} snapshots");
        Ok(())
    }

    fn purge(&self, node_id: &str) -> Result<(), DocTreeError> {
        let _guard = self.index_lock.lock();
        let dir = self.history_dir(node_id);
        match fs::remove_dir_all(&dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(DocTreeError::Io(format!(
                "failed to remove history {}: {e}",
                dir.display()
            ))),
            _ => Ok(()),
        }
    }
}

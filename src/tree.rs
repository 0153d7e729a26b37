//! Node lifecycle and versioned content.
//!
//! Every write path in [DocumentTreeManager] takes the index's exclusive guard once and keeps it
//! for the whole validate, mutate, persist sequence. Validation happens before the first mutation,
//! and if persisting fails the in-memory change is undone, so a failed call leaves the index as it
//! found it.
//!
//! Content bodies live next to the index as `<id>.md`. Before a body is overwritten its previous
//! text is handed to the [SnapshotStore]; that step is best effort and never blocks the write.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, sync::Arc};

use crate::{
    differ::{ContentDiffer, DiffResult},
    error::DocTreeError,
    fsutil::{read_or_empty, remove_if_exists, write_atomic},
    impact::{self, AnalysisMode, ImpactResult},
    index::{IndexManager, IndexState},
    properties::{
        new_id, CreateNodeRequest, DocMetaEntry, DocumentTree, MoveNodeRequest, UpdateNodeRequest,
        MAX_LEVEL,
    },
    snapshot::{FileSnapshotStore, SnapshotMeta, SnapshotStore},
};

#[cfg(test)]
mod tests;

/// A node's metadata together with the body read under the same guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeContent {
    pub meta: DocMetaEntry,
    pub content: String,
}

fn read_content(path: &Path) -> Result<String, DocTreeError> {
    read_or_empty(path).map_err(|e| {
        DocTreeError::Io(format!(
            "failed to read content file {}: {e}",
            path.display()
        ))
    })
}

#[derive(Debug, Clone)]
pub struct DocumentTreeManager {
    index: Arc<IndexManager>,
    snapshots: Arc<dyn SnapshotStore>,
    differ: ContentDiffer,
    history_retain: Option<usize>,
}

impl DocumentTreeManager {
    /// Tree manager with file-backed history under the index's project directory.
    pub fn new(index: Arc<IndexManager>) -> Self {
        let snapshots = Arc::new(FileSnapshotStore::new(index.project_dir()));
        Self::with_snapshot_store(index, snapshots)
    }

    pub fn with_snapshot_store(index: Arc<IndexManager>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        DocumentTreeManager {
            index,
            snapshots,
            differ: ContentDiffer::new(),
            history_retain: None,
        }
    }

    /// Prune history to the newest `retain` snapshots after each content update.
    pub fn with_history_retain(mut self, retain: Option<usize>) -> Self {
        self.history_retain = retain;
        self
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub fn initialize(&self) -> Result<(), DocTreeError> {
        self.index.load()
    }

    pub fn create_node(&self, req: CreateNodeRequest) -> Result<DocMetaEntry, DocTreeError> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(DocTreeError::InvalidRequest(
                "title cannot be empty".to_string(),
            ));
        }

        let mut state = self.index.write();
        let level = match req.parent_id.as_deref() {
            Some(parent_id) => {
                let level = state.get_node(parent_id)?.level + 1;
                if level > MAX_LEVEL {
                    return Err(DocTreeError::HierarchyOverflow);
                }
                state.validate_children_limit(parent_id)?;
                level
            }
            None => 1,
        };

        let now = Utc::now();
        let mut meta = DocMetaEntry {
            id: new_id("doc"),
            parent_id: req.parent_id.clone(),
            title: title.to_string(),
            doc_type: req.doc_type,
            level,
            position: 0,
            version: 1,
            updated_at: now,
            created_at: now,
        };
        meta.position = state.child_count(meta.parent_key());
        meta.validate_level()?;

        let content_path = state.content_path(&meta.id);
        state.add_node(meta.clone());
        let persisted = write_atomic(&content_path, req.content.as_bytes())
            .and_then(|_| state.flush_documents());
        if let Err(e) = persisted {
            state.remove_node(&meta.id);
            remove_if_exists(&content_path).ok();
            return Err(e);
        }

        tracing::info!(
            "[DocumentTreeManager] created {} '{}' at level {} position {}",
            meta.id,
            meta.title,
            meta.level,
            meta.position
        );
        Ok(meta)
    }

    pub fn move_node(&self, node_id: &str, req: MoveNodeRequest) -> Result<DocMetaEntry, DocTreeError> {
        let mut state = self.index.write();
        let current = state.get_node(node_id)?.clone();

        let new_level = match req.new_parent_id.as_deref() {
            Some(parent_id) => {
                if parent_id == node_id || state.is_descendant(node_id, parent_id) {
                    return Err(DocTreeError::CircularDependency);
                }
                state.get_node(parent_id)?.level + 1
            }
            None => 1,
        };
        if new_level > MAX_LEVEL || new_level + state.subtree_height(node_id) > MAX_LEVEL {
            return Err(DocTreeError::HierarchyOverflow);
        }
        if let Some(parent_id) = req.new_parent_id.as_deref() {
            // Staying under the same parent frees no slot, but takes none either.
            if current.parent_id.as_deref() != Some(parent_id) {
                state.validate_children_limit(parent_id)?;
            }
        }

        let subtree = state.subtree_post_order(node_id);
        let previous = subtree
            .iter()
            .filter_map(|id| state.get_node(id).ok().cloned())
            .collect::<Vec<_>>();

        let now = Utc::now();
        {
            let moved = state.get_node_mut(node_id)?;
            moved.parent_id = req.new_parent_id.clone();
            moved.level = new_level;
            moved.position = req.position;
            moved.updated_at = now;
        }
        relevel_children(&mut state, node_id, new_level, now)?;
        state.rebuild_parent_children_map();

        if let Err(e) = state.flush_documents() {
            for meta in previous {
                state.add_node(meta);
            }
            state.rebuild_parent_children_map();
            return Err(e);
        }

        let moved = state.get_node(node_id)?.clone();
        tracing::info!(
            "[DocumentTreeManager] moved {} under {} at level {} position {}",
            node_id,
            moved.parent_key(),
            moved.level,
            moved.position
        );
        Ok(moved)
    }

    pub fn update_node(&self, node_id: &str, req: UpdateNodeRequest) -> Result<DocMetaEntry, DocTreeError> {
        if req.title.is_none() && req.doc_type.is_none() {
            return Err(DocTreeError::InvalidRequest(
                "no fields to update".to_string(),
            ));
        }
        let title = match req.title.as_deref().map(str::trim) {
            Some("") => {
                return Err(DocTreeError::InvalidRequest(
                    "title cannot be empty".to_string(),
                ))
            }
            other => other.map(str::to_string),
        };

        let mut state = self.index.write();
        let previous = state.get_node(node_id)?.clone();
        let updated = {
            let meta = state.get_node_mut(node_id)?;
            if let Some(title) = title {
                meta.title = title;
            }
            if let Some(doc_type) = req.doc_type {
                meta.doc_type = doc_type;
            }
            meta.updated_at = Utc::now();
            meta.clone()
        };
        if let Err(e) = state.flush_documents() {
            state.add_node(previous);
            return Err(e);
        }
        Ok(updated)
    }

    /// Tree rooted at `root_id`, or at a synthetic `virtual_root` whose children are the root
    /// documents. `depth == 0` returns the node without children.
    pub fn get_tree(&self, root_id: Option<&str>, depth: usize) -> Result<DocumentTree, DocTreeError> {
        let state = self.index.read();
        let root = match root_id {
            Some(id) => state.get_node(id)?.clone(),
            None => DocMetaEntry::virtual_root(),
        };
        Ok(build_tree(&state, root, depth))
    }

    /// Remove a node, or with `cascade` its whole subtree. Returns the removed ids, children
    /// before parents.
    ///
    /// Relationships and references touching the removed nodes are left alone here; see
    /// [crate::project::Project::delete_node] for the variant that purges them too.
    pub fn delete_node(&self, node_id: &str, cascade: bool) -> Result<Vec<String>, DocTreeError> {
        let mut state = self.index.write();
        let removed = self.delete_locked(&mut state, node_id, cascade)?;
        drop(state);
        self.cleanup_files(&removed);
        Ok(removed)
    }

    /// Ids that deleting `node_id` would remove, validated against the cascade flag.
    pub(crate) fn plan_delete(
        state: &IndexState,
        node_id: &str,
        cascade: bool,
    ) -> Result<Vec<String>, DocTreeError> {
        state.get_node(node_id)?;
        if !cascade && state.child_count(node_id) > 0 {
            return Err(DocTreeError::InvalidRequest(format!(
                "node {node_id} has children, use cascade to delete"
            )));
        }
        Ok(state.subtree_post_order(node_id))
    }

    /// Guard-held removal of the whole subtree with a single flush. Either every entry is gone
    /// and persisted, or on failure every entry is put back.
    pub(crate) fn delete_locked(
        &self,
        state: &mut IndexState,
        node_id: &str,
        cascade: bool,
    ) -> Result<Vec<String>, DocTreeError> {
        let ids = Self::plan_delete(state, node_id, cascade)?;
        let removed = ids
            .iter()
            .filter_map(|id| state.remove_node(id))
            .collect::<Vec<_>>();
        state.rebuild_parent_children_map();

        if let Err(e) = state.flush_documents() {
            tracing::error!(
                "[DocumentTreeManager] delete of {node_id} failed to persist, restoring {} nodes: {e}",
                removed.len()
            );
            for meta in removed {
                state.add_node(meta);
            }
            state.rebuild_parent_children_map();
            return Err(e);
        }

        tracing::info!(
            "[DocumentTreeManager] deleted {node_id} ({} nodes)",
            ids.len()
        );
        Ok(ids)
    }

    /// Best-effort removal of content sidecars and history for nodes already gone from the index.
    pub(crate) fn cleanup_files(&self, node_ids: &[String]) {
        for id in node_ids {
            let path = self.index.content_path(id);
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!(
                    "[DocumentTreeManager] failed to delete content file {}: {e}",
                    path.display()
                );
            }
            if let Err(e) = self.snapshots.purge(id) {
                tracing::warn!("[DocumentTreeManager] failed to purge history of {id}: {e}");
            }
        }
    }

    /// Replace the body of `node_id`, provided the caller saw the current version. Returns the
    /// new version.
    pub fn update_content(
        &self,
        node_id: &str,
        content: &str,
        client_version: u64,
    ) -> Result<u64, DocTreeError> {
        let mut state = self.index.write();
        let previous_meta = state.get_node(node_id)?.clone();
        if previous_meta.version != client_version {
            return Err(DocTreeError::VersionMismatch {
                expected: client_version,
                actual: previous_meta.version,
            });
        }

        let path = state.content_path(node_id);
        let previous_content = read_content(&path)?;
        if let Err(e) = self
            .snapshots
            .create_snapshot(node_id, previous_meta.version, &previous_content)
        {
            tracing::warn!(
                "[DocumentTreeManager] failed to snapshot {node_id} version {}: {e}",
                previous_meta.version
            );
        }

        write_atomic(&path, content.as_bytes())?;
        let next_version = previous_meta.version + 1;
        {
            let meta = state.get_node_mut(node_id)?;
            meta.version = next_version;
            meta.updated_at = Utc::now();
        }
        if let Err(e) = state.flush_documents() {
            if let Err(restore) = write_atomic(&path, previous_content.as_bytes()) {
                tracing::error!(
                    "[DocumentTreeManager] could not restore content of {node_id}: {restore}"
                );
            }
            state.add_node(previous_meta);
            return Err(e);
        }

        // Still under the exclusive guard, serialized with this node's snapshot writes.
        if let Some(keep) = self.history_retain {
            if let Err(e) = self.snapshots.cleanup(node_id, keep) {
                tracing::warn!("[DocumentTreeManager] failed to prune history of {node_id}: {e}");
            }
        }
        drop(state);
        tracing::debug!("[DocumentTreeManager] {node_id} now at version {next_version}");
        Ok(next_version)
    }

    /// Metadata and body, read under one shared guard so the pair is consistent.
    pub fn get_content(&self, node_id: &str) -> Result<NodeContent, DocTreeError> {
        let state = self.index.read();
        let meta = state.get_node(node_id)?.clone();
        let content = read_content(&state.content_path(node_id))?;
        Ok(NodeContent { meta, content })
    }

    /// Snapshot history newest first, always led by an entry for the live version.
    pub fn get_version_history(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<SnapshotMeta>, DocTreeError> {
        let state = self.index.read();
        let meta = state.get_node(node_id)?;
        let mut history = self.snapshots.list_snapshots(node_id, limit)?;
        if !history.iter().any(|snap| snap.version == meta.version) {
            let path = state.content_path(node_id);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            history.insert(
                0,
                SnapshotMeta {
                    version: meta.version,
                    created_at: meta.updated_at,
                    path,
                    size,
                },
            );
            if limit > 0 {
                history.truncate(limit);
            }
        }
        Ok(history)
    }

    pub fn get_version_content(&self, node_id: &str, version: u64) -> Result<String, DocTreeError> {
        let state = self.index.read();
        self.version_content_locked(&state, node_id, version)
    }

    fn version_content_locked(
        &self,
        state: &IndexState,
        node_id: &str,
        version: u64,
    ) -> Result<String, DocTreeError> {
        let meta = state.get_node(node_id)?;
        if version == 0 || version == meta.version {
            return read_content(&state.content_path(node_id));
        }
        if version > meta.version {
            return Err(DocTreeError::SnapshotNotFound {
                node_id: node_id.to_string(),
                version,
            });
        }
        self.snapshots.get_snapshot(node_id, version)
    }

    /// Diff two versions of a node. Version `0` stands for the live content and is reported as
    /// the live version number.
    pub fn compare_versions(
        &self,
        node_id: &str,
        from_version: u64,
        to_version: u64,
    ) -> Result<DiffResult, DocTreeError> {
        let state = self.index.read();
        let current = state.get_node(node_id)?.version;
        let resolve = |v: u64| if v == 0 { current } else { v };
        let from_content = self.version_content_locked(&state, node_id, from_version)?;
        let to_content = self.version_content_locked(&state, node_id, to_version)?;
        drop(state);
        Ok(self.differ.compare_content(
            &from_content,
            &to_content,
            resolve(from_version),
            resolve(to_version),
        ))
    }

    pub fn analyze_impact(
        &self,
        node_id: &str,
        modes: &[AnalysisMode],
    ) -> Result<ImpactResult, DocTreeError> {
        impact::analyze(&self.index.read(), node_id, modes)
    }
}

fn relevel_children(
    state: &mut IndexState,
    parent_id: &str,
    parent_level: u32,
    now: chrono::DateTime<Utc>,
) -> Result<(), DocTreeError> {
    for child_id in state.get_children(parent_id) {
        let level = parent_level + 1;
        {
            let child = state.get_node_mut(&child_id)?;
            child.level = level;
            child.updated_at = now;
            child.validate_level()?;
        }
        relevel_children(state, &child_id, level, now)?;
    }
    Ok(())
}

fn build_tree(state: &IndexState, node: DocMetaEntry, depth: usize) -> DocumentTree {
    let mut tree = DocumentTree {
        children: Vec::new(),
        node,
    };
    if depth == 0 {
        return tree;
    }
    for child_id in state.get_children(&tree.node.id) {
        match state.get_node(&child_id) {
            Ok(child) => tree
                .children
                .push(build_tree(state, child.clone(), depth - 1)),
            Err(_) => tracing::warn!(
                "[DocumentTreeManager] skipping orphaned child {child_id} of {}",
                tree.node.id
            ),
        }
    }
    tree
}

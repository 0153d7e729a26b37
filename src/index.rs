//! The project index: single source of truth for documents, relationships and references.
//!
//! [IndexManager] owns one [parking_lot::RwLock] around an [IndexState]. Every structure the
//! engine shares (document metadata, the parent -> children adjacency, relationships, and the
//! reference maps) lives inside that one lock, so a writer holding [IndexManager::write] sees and
//! updates all of them consistently.
//!
//! The convenience methods on [IndexManager] take the lock themselves. Call sites that already
//! hold a guard use the same-named methods on [IndexState] instead; those never lock, which rules
//! out re-entrant deadlocks.
//!
//! Persistence is three JSON files in the project directory, each replaced atomically on flush:
//!
//! - `documents_index.json`: `{documents: {id: DocMetaEntry}, version, updated_at}`
//! - `relationships_index.json`: `{relationships: {id: Relationship}, version, updated_at}`
//! - `references_index.json`: `{references: {id: Reference}, version, updated_at}`
//!
//! Derived structures (adjacency, references grouped by task and by document) are never
//! persisted; they are rebuilt after every load.
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::DocTreeError,
    fsutil::write_json_atomic,
    properties::{DocMetaEntry, Reference, Relationship, MAX_CHILDREN_PER_NODE, VIRTUAL_ROOT_ID},
};

pub const DOCUMENTS_INDEX_FILE: &str = "documents_index.json";
pub const RELATIONSHIPS_INDEX_FILE: &str = "relationships_index.json";
pub const REFERENCES_INDEX_FILE: &str = "references_index.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentsIndex<M = BTreeMap<String, DocMetaEntry>> {
    pub documents: M,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelationshipsIndex<M = BTreeMap<String, Relationship>> {
    pub relationships: M,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReferencesIndex<M = BTreeMap<String, Reference>> {
    pub references: M,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Path to a node's content sidecar.
pub fn content_path(project_dir: &Path, node_id: &str) -> PathBuf {
    project_dir.join(format!("{node_id}.md"))
}

fn read_index<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, DocTreeError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .map_err(|e| DocTreeError::Io(format!("failed to open {}: {e}", path.display())))?;
    let index = serde_json::from_str(&text).map_err(|e| {
        DocTreeError::Serialization(format!("failed to decode {}: {e}", path.display()))
    })?;
    Ok(Some(index))
}

/// Everything guarded by the index lock. Methods here assume the caller holds the guard.
#[derive(Debug)]
pub struct IndexState {
    project_dir: PathBuf,
    doc_meta: BTreeMap<String, DocMetaEntry>,
    parent_children: HashMap<String, Vec<String>>,
    relationships: BTreeMap<String, Relationship>,
    references: BTreeMap<String, Reference>,
    references_by_task: BTreeMap<String, Vec<String>>,
    references_by_doc: BTreeMap<String, Vec<String>>,
    version: u64,
}

impl IndexState {
    fn empty(project_dir: PathBuf) -> Self {
        IndexState {
            project_dir,
            doc_meta: BTreeMap::new(),
            parent_children: HashMap::new(),
            relationships: BTreeMap::new(),
            references: BTreeMap::new(),
            references_by_task: BTreeMap::new(),
            references_by_doc: BTreeMap::new(),
            version: 1,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn content_path(&self, node_id: &str) -> PathBuf {
        content_path(&self.project_dir, node_id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    // ---------- documents ----------

    pub fn documents(&self) -> &BTreeMap<String, DocMetaEntry> {
        &self.doc_meta
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.doc_meta.contains_key(node_id)
    }

    pub fn get_node(&self, node_id: &str) -> Result<&DocMetaEntry, DocTreeError> {
        self.doc_meta
            .get(node_id)
            .ok_or_else(|| DocTreeError::NodeNotFound(node_id.to_string()))
    }

    pub fn get_node_mut(&mut self, node_id: &str) -> Result<&mut DocMetaEntry, DocTreeError> {
        self.doc_meta
            .get_mut(node_id)
            .ok_or_else(|| DocTreeError::NodeNotFound(node_id.to_string()))
    }

    /// Insert (or replace) a node and slot it into its parent's ordered child list.
    pub fn add_node(&mut self, meta: DocMetaEntry) {
        let parent_key = meta.parent_key().to_string();
        let id = meta.id.clone();
        if let Some(old) = self.doc_meta.insert(id.clone(), meta) {
            if let Some(siblings) = self.parent_children.get_mut(old.parent_key()) {
                siblings.retain(|child| child != &id);
            }
        }
        self.parent_children
            .entry(parent_key.clone())
            .or_default()
            .push(id);
        self.sort_children_by_position(&parent_key);
    }

    /// Remove a node from the metadata map and from its parent's child list. The node's own
    /// child bucket is left alone; callers removing a subtree remove every member.
    pub fn remove_node(&mut self, node_id: &str) -> Option<DocMetaEntry> {
        let meta = self.doc_meta.remove(node_id)?;
        if let Some(siblings) = self.parent_children.get_mut(meta.parent_key()) {
            siblings.retain(|child| child != node_id);
            if siblings.is_empty() {
                self.parent_children.remove(meta.parent_key());
            }
        }
        Some(meta)
    }

    /// Children of `parent_id` ordered by `(position, id)`. Always a fresh copy.
    pub fn get_children(&self, parent_id: &str) -> Vec<String> {
        self.parent_children
            .get(parent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn child_count(&self, parent_id: &str) -> usize {
        self.parent_children
            .get(parent_id)
            .map(|children| children.len())
            .unwrap_or(0)
    }

    pub fn validate_children_limit(&self, parent_id: &str) -> Result<(), DocTreeError> {
        if self.child_count(parent_id) >= MAX_CHILDREN_PER_NODE {
            return Err(DocTreeError::ChildrenLimitReached);
        }
        Ok(())
    }

    /// Rebuild the adjacency map from `doc_meta`. Never trusts a previous adjacency.
    pub fn rebuild_parent_children_map(&mut self) {
        let mut parent_children: HashMap<String, Vec<String>> = HashMap::new();
        for (node_id, meta) in self.doc_meta.iter() {
            parent_children
                .entry(meta.parent_key().to_string())
                .or_default()
                .push(node_id.clone());
        }
        self.parent_children = parent_children;
        let parents = self.parent_children.keys().cloned().collect::<Vec<_>>();
        for parent_id in parents {
            self.sort_children_by_position(&parent_id);
        }
    }

    fn sort_children_by_position(&mut self, parent_id: &str) {
        let Some(children) = self.parent_children.get_mut(parent_id) else {
            return;
        };
        let doc_meta = &self.doc_meta;
        children.retain(|child| doc_meta.contains_key(child));
        children.sort_by(|left, right| {
            let left_pos = doc_meta.get(left).map(|m| m.position);
            let right_pos = doc_meta.get(right).map(|m| m.position);
            left_pos.cmp(&right_pos).then_with(|| left.cmp(right))
        });
        if children.is_empty() {
            self.parent_children.remove(parent_id);
        }
    }

    /// True when `target` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, ancestor: &str, target: &str) -> bool {
        let mut stack = self.get_children(ancestor);
        let mut visited = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if visited.insert(current.clone()) {
                stack.extend(self.get_children(&current));
            }
        }
        false
    }

    /// Descendants of `node_id` followed by the node itself, children before parents.
    pub fn subtree_post_order(&self, node_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_post_order(node_id, &mut out);
        out
    }

    fn collect_post_order(&self, node_id: &str, out: &mut Vec<String>) {
        for child in self.get_children(node_id) {
            self.collect_post_order(&child, out);
        }
        out.push(node_id.to_string());
    }

    /// Number of levels below `node_id` (0 for a leaf).
    pub fn subtree_height(&self, node_id: &str) -> u32 {
        self.get_children(node_id)
            .iter()
            .map(|child| 1 + self.subtree_height(child))
            .max()
            .unwrap_or(0)
    }

    // ---------- relationships ----------

    pub fn relationships(&self) -> &BTreeMap<String, Relationship> {
        &self.relationships
    }

    pub fn relationships_mut(&mut self) -> &mut BTreeMap<String, Relationship> {
        &mut self.relationships
    }

    // ---------- references ----------

    pub fn references(&self) -> &BTreeMap<String, Reference> {
        &self.references
    }

    pub fn reference(&self, ref_id: &str) -> Option<&Reference> {
        self.references.get(ref_id)
    }

    pub fn reference_mut(&mut self, ref_id: &str) -> Option<&mut Reference> {
        self.references.get_mut(ref_id)
    }

    pub fn references_by_task(&self, task_id: &str) -> Vec<&Reference> {
        self.collect_refs(self.references_by_task.get(task_id))
    }

    pub fn references_by_doc(&self, document_id: &str) -> Vec<&Reference> {
        self.collect_refs(self.references_by_doc.get(document_id))
    }

    fn collect_refs(&self, ids: Option<&Vec<String>>) -> Vec<&Reference> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.references.get(id))
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn task_ids_with_references(&self) -> impl Iterator<Item = &String> {
        self.references_by_task.keys()
    }

    pub fn document_ids_with_references(&self) -> impl Iterator<Item = &String> {
        self.references_by_doc.keys()
    }

    pub fn insert_reference(&mut self, reference: Reference) {
        self.references_by_task
            .entry(reference.task_id.clone())
            .or_default()
            .push(reference.id.clone());
        self.references_by_doc
            .entry(reference.document_id.clone())
            .or_default()
            .push(reference.id.clone());
        self.references.insert(reference.id.clone(), reference);
    }

    /// Remove a reference from the flat map and both derived maps, dropping emptied buckets.
    pub fn remove_reference(&mut self, ref_id: &str) -> Option<Reference> {
        let reference = self.references.remove(ref_id)?;
        for (map, key) in [
            (&mut self.references_by_task, &reference.task_id),
            (&mut self.references_by_doc, &reference.document_id),
        ] {
            if let Some(ids) = map.get_mut(key) {
                ids.retain(|id| id != ref_id);
                if ids.is_empty() {
                    map.remove(key);
                }
            }
        }
        Some(reference)
    }

    fn rebuild_reference_maps(&mut self) {
        self.references_by_task.clear();
        self.references_by_doc.clear();
        for reference in self.references.values() {
            self.references_by_task
                .entry(reference.task_id.clone())
                .or_default()
                .push(reference.id.clone());
            self.references_by_doc
                .entry(reference.document_id.clone())
                .or_default()
                .push(reference.id.clone());
        }
    }

    // ---------- persistence ----------

    fn path(&self, file: &str) -> PathBuf {
        self.project_dir.join(file)
    }

    pub fn flush_documents(&mut self) -> Result<(), DocTreeError> {
        self.version += 1;
        let index = DocumentsIndex {
            documents: &self.doc_meta,
            version: self.version,
            updated_at: Utc::now(),
        };
        write_json_atomic(self.path(DOCUMENTS_INDEX_FILE), &index)?;
        tracing::debug!(
            "[IndexManager] flushed {} documents at index version {}",
            self.doc_meta.len(),
            self.version
        );
        Ok(())
    }

    pub fn flush_relationships(&mut self) -> Result<(), DocTreeError> {
        self.version += 1;
        let index = RelationshipsIndex {
            relationships: &self.relationships,
            version: self.version,
            updated_at: Utc::now(),
        };
        write_json_atomic(self.path(RELATIONSHIPS_INDEX_FILE), &index)?;
        tracing::debug!(
            "[IndexManager] flushed {} relationships at index version {}",
            self.relationships.len(),
            self.version
        );
        Ok(())
    }

    pub fn flush_references(&mut self) -> Result<(), DocTreeError> {
        self.version += 1;
        let index = ReferencesIndex {
            references: &self.references,
            version: self.version,
            updated_at: Utc::now(),
        };
        write_json_atomic(self.path(REFERENCES_INDEX_FILE), &index)?;
        tracing::debug!(
            "[IndexManager] flushed {} references at index version {}",
            self.references.len(),
            self.version
        );
        Ok(())
    }

    fn load(&mut self) -> Result<(), DocTreeError> {
        fs::create_dir_all(&self.project_dir).map_err(|e| {
            DocTreeError::Io(format!(
                "failed to create project directory {}: {e}",
                self.project_dir.display()
            ))
        })?;

        let mut version = 1;

        match read_index::<DocumentsIndex>(&self.path(DOCUMENTS_INDEX_FILE))? {
            Some(index) => {
                self.doc_meta = index.documents;
                version = version.max(index.version);
            }
            None => {
                self.doc_meta.clear();
                write_json_atomic(
                    self.path(DOCUMENTS_INDEX_FILE),
                    &DocumentsIndex {
                        documents: &self.doc_meta,
                        version: 1,
                        updated_at: Utc::now(),
                    },
                )?;
            }
        }

        match read_index::<RelationshipsIndex>(&self.path(RELATIONSHIPS_INDEX_FILE))? {
            Some(index) => {
                self.relationships = index.relationships;
                version = version.max(index.version);
            }
            None => {
                self.relationships.clear();
                write_json_atomic(
                    self.path(RELATIONSHIPS_INDEX_FILE),
                    &RelationshipsIndex {
                        relationships: &self.relationships,
                        version: 1,
                        updated_at: Utc::now(),
                    },
                )?;
            }
        }

        match read_index::<ReferencesIndex>(&self.path(REFERENCES_INDEX_FILE))? {
            Some(index) => {
                self.references = index.references;
                version = version.max(index.version);
            }
            None => {
                self.references.clear();
                write_json_atomic(
                    self.path(REFERENCES_INDEX_FILE),
                    &ReferencesIndex {
                        references: &self.references,
                        version: 1,
                        updated_at: Utc::now(),
                    },
                )?;
            }
        }

        self.version = version;
        self.rebuild_parent_children_map();
        self.rebuild_reference_maps();
        Ok(())
    }
}

/// Owner of a project's [IndexState]. One instance per project directory.
#[derive(Debug)]
pub struct IndexManager {
    project_dir: PathBuf,
    state: RwLock<IndexState>,
}

impl IndexManager {
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        let project_dir = project_dir.as_ref().to_path_buf();
        IndexManager {
            state: RwLock::new(IndexState::empty(project_dir.clone())),
            project_dir,
        }
    }

    /// Ensure the project directory exists, create absent index files empty, decode the rest,
    /// and rebuild every derived structure.
    pub fn load(&self) -> Result<(), DocTreeError> {
        let mut state = self.state.write();
        state.load()?;
        tracing::info!(
            "[IndexManager] loaded {} documents, {} relationships, {} references from {:?}",
            state.doc_meta.len(),
            state.relationships.len(),
            state.references.len(),
            self.project_dir
        );
        Ok(())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn content_path(&self, node_id: &str) -> PathBuf {
        content_path(&self.project_dir, node_id)
    }

    /// Shared guard for multi-step reads.
    pub fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read()
    }

    /// Exclusive guard for read-modify-flush sequences.
    pub fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write()
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn add_node(&self, meta: DocMetaEntry) {
        self.state.write().add_node(meta);
    }

    pub fn get_node(&self, node_id: &str) -> Result<DocMetaEntry, DocTreeError> {
        self.state.read().get_node(node_id).cloned()
    }

    pub fn get_children(&self, parent_id: &str) -> Vec<String> {
        self.state.read().get_children(parent_id)
    }

    /// Root documents, i.e. the children of the virtual root.
    pub fn get_roots(&self) -> Vec<String> {
        self.get_children(VIRTUAL_ROOT_ID)
    }

    pub fn list_all_documents(&self) -> Vec<String> {
        self.state.read().doc_meta.keys().cloned().collect()
    }

    pub fn validate_children_limit(&self, parent_id: &str) -> Result<(), DocTreeError> {
        self.state.read().validate_children_limit(parent_id)
    }

    pub fn flush_documents(&self) -> Result<(), DocTreeError> {
        self.state.write().flush_documents()
    }

    pub fn flush_relationships(&self) -> Result<(), DocTreeError> {
        self.state.write().flush_relationships()
    }

    pub fn flush_references(&self) -> Result<(), DocTreeError> {
        self.state.write().flush_references()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{DocumentType, Relationship, RelationType};
    use tempfile::tempdir;
    use test_log::test;

    fn meta(id: &str, parent: Option<&str>, position: usize) -> DocMetaEntry {
        let now = Utc::now();
        DocMetaEntry {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            title: id.to_uppercase(),
            doc_type: DocumentType::Background,
            level: if parent.is_some() { 2 } else { 1 },
            position,
            version: 1,
            updated_at: now,
            created_at: now,
        }
    }

    #[test]
    fn test_load_creates_empty_index_files() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("proj").join("documents");
        let index = IndexManager::new(&project);
        index.load().unwrap();

        for file in [
            DOCUMENTS_INDEX_FILE,
            RELATIONSHIPS_INDEX_FILE,
            REFERENCES_INDEX_FILE,
        ] {
            assert!(project.join(file).exists(), "{file} should be created");
        }
        assert!(index.list_all_documents().is_empty());
    }

    #[test]
    fn test_children_sorted_by_position_then_id() {
        let dir = tempdir().unwrap();
        let index = IndexManager::new(dir.path());
        index.load().unwrap();
        index.add_node(meta("root", None, 0));
        index.add_node(meta("c", Some("root"), 1));
        index.add_node(meta("b", Some("root"), 0));
        index.add_node(meta("a", Some("root"), 1));

        assert_eq!(index.get_children("root"), vec!["b", "a", "c"]);
        assert_eq!(index.get_roots(), vec!["root"]);

        // The returned vector is a copy; mutating it leaves the index alone.
        let mut copy = index.get_children("root");
        copy.clear();
        assert_eq!(index.get_children("root").len(), 3);
    }

    #[test]
    fn test_reload_rebuilds_adjacency_and_references() {
        let dir = tempdir().unwrap();
        {
            let index = IndexManager::new(dir.path());
            index.load().unwrap();
            index.add_node(meta("root", None, 0));
            index.add_node(meta("child", Some("root"), 0));
            let mut state = index.write();
            let rel = Relationship::new("root", "child", RelationType::Sibling);
            state.relationships_mut().insert(rel.id.clone(), rel);
            let now = Utc::now();
            state.insert_reference(Reference {
                id: "ref_1".into(),
                task_id: "task_1".into(),
                document_id: "child".into(),
                anchor: String::new(),
                context: String::new(),
                status: crate::properties::ReferenceStatus::Active,
                version: 1,
                created_at: now,
                updated_at: now,
            });
            state.flush_documents().unwrap();
            state.flush_relationships().unwrap();
            state.flush_references().unwrap();
        }

        let index = IndexManager::new(dir.path());
        index.load().unwrap();
        assert_eq!(index.get_children("root"), vec!["child"]);
        let state = index.read();
        assert_eq!(state.relationships().len(), 1);
        assert_eq!(state.references_by_task("task_1").len(), 1);
        assert_eq!(state.references_by_doc("child")[0].id, "ref_1");
        assert!(state.version() >= 4);
    }

    #[test]
    fn test_flush_increments_version() {
        let dir = tempdir().unwrap();
        let index = IndexManager::new(dir.path());
        index.load().unwrap();
        let before = index.version();
        index.flush_documents().unwrap();
        index.flush_relationships().unwrap();
        index.flush_references().unwrap();
        assert_eq!(index.version(), before + 3);
    }

    #[test]
    fn test_children_limit() {
        let dir = tempdir().unwrap();
        let index = IndexManager::new(dir.path());
        index.load().unwrap();
        index.add_node(meta("root", None, 0));
        for i in 0..MAX_CHILDREN_PER_NODE {
            assert!(index.validate_children_limit("root").is_ok());
            index.add_node(meta(&format!("child_{i:02}"), Some("root"), i));
        }
        assert_eq!(
            index.validate_children_limit("root"),
            Err(DocTreeError::ChildrenLimitReached)
        );
    }

    #[test]
    fn test_remove_reference_drops_empty_buckets() {
        let dir = tempdir().unwrap();
        let index = IndexManager::new(dir.path());
        let mut state = index.write();
        let now = Utc::now();
        state.insert_reference(Reference {
            id: "ref_1".into(),
            task_id: "task".into(),
            document_id: "doc".into(),
            anchor: String::new(),
            context: String::new(),
            status: crate::properties::ReferenceStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        });
        assert!(state.remove_reference("ref_1").is_some());
        assert_eq!(state.task_ids_with_references().count(), 0);
        assert_eq!(state.document_ids_with_references().count(), 0);
        assert!(state.remove_reference("ref_1").is_none());
    }

    #[test]
    fn test_subtree_helpers() {
        let dir = tempdir().unwrap();
        let index = IndexManager::new(dir.path());
        index.add_node(meta("a", None, 0));
        index.add_node(meta("b", Some("a"), 0));
        index.add_node(meta("c", Some("b"), 0));
        index.add_node(meta("d", Some("a"), 1));
        let state = index.read();
        assert!(state.is_descendant("a", "c"));
        assert!(!state.is_descendant("c", "a"));
        assert_eq!(state.subtree_post_order("a"), vec!["c", "b", "d", "a"]);
        assert_eq!(state.subtree_height("a"), 2);
        assert_eq!(state.subtree_height("d"), 0);
    }
}

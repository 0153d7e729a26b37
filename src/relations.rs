//! Graph edges between documents.
//!
//! Edges are `parent_child` / `sibling` (explicit, maintained alongside the tree) or `reference`
//! (implicit, created by users and refined by a [DependencyType]). No edge may close a directed
//! cycle; [detect_cycle] runs before every insertion under the same exclusive guard that performs
//! the insertion, so two concurrent inserts cannot jointly form a cycle.
use chrono::Utc;
use std::{collections::HashSet, sync::Arc};

use crate::{
    error::DocTreeError,
    index::{IndexManager, IndexState},
    properties::{CreateRelationshipRequest, DependencyType, RelationType, Relationship},
};

/// Fails with [DocTreeError::CircularDependency] if adding `from -> to` would close a cycle.
///
/// A self loop is rejected outright. Otherwise this searches depth first from `to`, following
/// existing `from_id -> to_id` edges, for a path back to `from`.
pub fn detect_cycle(state: &IndexState, from_id: &str, to_id: &str) -> Result<(), DocTreeError> {
    if from_id == to_id {
        return Err(DocTreeError::CircularDependency);
    }
    let mut visited = HashSet::new();
    let mut stack = vec![to_id.to_string()];
    while let Some(current) = stack.pop() {
        if current == from_id {
            return Err(DocTreeError::CircularDependency);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        for rel in state.relationships().values() {
            if rel.from_id == current && !visited.contains(&rel.to_id) {
                stack.push(rel.to_id.clone());
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RelationshipEngine {
    index: Arc<IndexManager>,
}

impl RelationshipEngine {
    pub fn new(index: Arc<IndexManager>) -> Self {
        RelationshipEngine { index }
    }

    /// Add a system-maintained edge. Only `parent_child` and `sibling` are accepted here.
    pub fn add_explicit_relation(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: RelationType,
    ) -> Result<Relationship, DocTreeError> {
        if !rel_type.is_explicit() {
            return Err(DocTreeError::InvalidRequest(
                "reference edges are added with add_implicit_relation".to_string(),
            ));
        }
        self.insert(Relationship::new(from_id, to_id, rel_type))
    }

    /// Add a user-created `reference` edge typed by `dependency_type`.
    pub fn add_implicit_relation(
        &self,
        from_id: &str,
        to_id: &str,
        dependency_type: DependencyType,
    ) -> Result<Relationship, DocTreeError> {
        let mut rel = Relationship::new(from_id, to_id, RelationType::Reference);
        rel.dependency_type = Some(dependency_type);
        self.insert(rel)
    }

    /// Dispatch a request to the explicit or implicit path, carrying its description.
    pub fn create_relation(
        &self,
        req: CreateRelationshipRequest,
    ) -> Result<Relationship, DocTreeError> {
        let mut rel = Relationship::new(&req.from_id, &req.to_id, req.rel_type);
        rel.description = req.description.trim().to_string();
        match req.rel_type {
            RelationType::Reference => {
                rel.dependency_type = req.dependency_type;
            }
            _ if req.dependency_type.is_some() => {
                return Err(DocTreeError::InvalidRequest(
                    "dependency_type only applies to reference edges".to_string(),
                ));
            }
            _ => {}
        }
        self.insert(rel)
    }

    fn insert(&self, rel: Relationship) -> Result<Relationship, DocTreeError> {
        let mut state = self.index.write();
        state.get_node(&rel.from_id)?;
        state.get_node(&rel.to_id)?;
        if state.relationships().values().any(|existing| {
            existing.from_id == rel.from_id
                && existing.to_id == rel.to_id
                && existing.rel_type == rel.rel_type
        }) {
            return Err(DocTreeError::DuplicateRelation);
        }
        detect_cycle(&state, &rel.from_id, &rel.to_id)?;

        state
            .relationships_mut()
            .insert(rel.id.clone(), rel.clone());
        if let Err(e) = state.flush_relationships() {
            state.relationships_mut().remove(&rel.id);
            return Err(e);
        }
        tracing::debug!(
            "[RelationshipEngine] {} -> {} ({:?}) as {}",
            rel.from_id,
            rel.to_id,
            rel.rel_type,
            rel.id
        );
        Ok(rel)
    }

    pub fn detect_cycle(&self, from_id: &str, to_id: &str) -> Result<(), DocTreeError> {
        detect_cycle(&self.index.read(), from_id, to_id)
    }

    fn collect<F: Fn(&Relationship) -> bool>(&self, keep: F) -> Vec<Relationship> {
        self.index
            .read()
            .relationships()
            .values()
            .filter(|rel| keep(rel))
            .cloned()
            .collect()
    }

    /// Edges in either direction.
    pub fn get_related(&self, node_id: &str) -> Vec<Relationship> {
        self.collect(|rel| rel.touches(node_id))
    }

    pub fn get_outgoing(&self, node_id: &str) -> Vec<Relationship> {
        self.collect(|rel| rel.from_id == node_id)
    }

    pub fn get_incoming(&self, node_id: &str) -> Vec<Relationship> {
        self.collect(|rel| rel.to_id == node_id)
    }

    pub fn get_relations_by_type(&self, rel_type: RelationType) -> Vec<Relationship> {
        self.collect(|rel| rel.rel_type == rel_type)
    }

    pub fn get_all_relations(&self) -> Vec<Relationship> {
        self.collect(|_| true)
    }

    pub fn get_relation(&self, relation_id: &str) -> Result<Relationship, DocTreeError> {
        self.index
            .read()
            .relationships()
            .get(relation_id)
            .cloned()
            .ok_or(DocTreeError::RelationNotFound)
    }

    pub fn update_relation_description(
        &self,
        relation_id: &str,
        description: &str,
    ) -> Result<Relationship, DocTreeError> {
        let mut state = self.index.write();
        let previous = state
            .relationships()
            .get(relation_id)
            .cloned()
            .ok_or(DocTreeError::RelationNotFound)?;
        let mut updated = previous.clone();
        updated.description = description.trim().to_string();
        updated.updated_at = Utc::now();
        state
            .relationships_mut()
            .insert(relation_id.to_string(), updated.clone());
        if let Err(e) = state.flush_relationships() {
            state
                .relationships_mut()
                .insert(relation_id.to_string(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    /// Remove the first edge `from -> to` of any type.
    pub fn remove_relation(&self, from_id: &str, to_id: &str) -> Result<(), DocTreeError> {
        let mut state = self.index.write();
        let relation_id = state
            .relationships()
            .values()
            .find(|rel| rel.from_id == from_id && rel.to_id == to_id)
            .map(|rel| rel.id.clone())
            .ok_or(DocTreeError::RelationNotFound)?;
        remove_and_flush(&mut state, &[relation_id])
    }

    pub fn delete_relation(&self, relation_id: &str) -> Result<(), DocTreeError> {
        let mut state = self.index.write();
        if !state.relationships().contains_key(relation_id) {
            return Err(DocTreeError::RelationNotFound);
        }
        remove_and_flush(&mut state, &[relation_id.to_string()])
    }

    /// Drop every edge touching any of `node_ids`. Returns how many were removed.
    pub fn purge_node_relations(&self, node_ids: &[String]) -> Result<usize, DocTreeError> {
        let mut state = self.index.write();
        purge_node_relations(&mut state, node_ids)
    }
}

/// Guard-held variant of [RelationshipEngine::purge_node_relations].
pub fn purge_node_relations(
    state: &mut IndexState,
    node_ids: &[String],
) -> Result<usize, DocTreeError> {
    let doomed = state
        .relationships()
        .values()
        .filter(|rel| node_ids.iter().any(|id| rel.touches(id)))
        .map(|rel| rel.id.clone())
        .collect::<Vec<_>>();
    if doomed.is_empty() {
        return Ok(0);
    }
    let count = doomed.len();
    remove_and_flush(state, &doomed)?;
    tracing::debug!("[RelationshipEngine] purged {count} edges");
    Ok(count)
}

fn remove_and_flush(state: &mut IndexState, relation_ids: &[String]) -> Result<(), DocTreeError> {
    let removed = relation_ids
        .iter()
        .filter_map(|id| state.relationships_mut().remove(id))
        .collect::<Vec<_>>();
    if let Err(e) = state.flush_relationships() {
        for rel in removed {
            state.relationships_mut().insert(rel.id.clone(), rel);
        }
        return Err(e);
    }
    Ok(())
}

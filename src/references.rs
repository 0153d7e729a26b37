//! Task -> document anchors.
//!
//! References live in the index next to documents and relationships. The flat id -> [Reference]
//! map is what gets persisted; the by-task and by-document groupings are derived and maintained by
//! [IndexState].
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::DocTreeError,
    index::{IndexManager, IndexState},
    properties::{new_id, CreateReferenceRequest, Reference, ReferenceStatus},
};

pub const MAX_ANCHOR_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub total_references: usize,
    pub active_count: usize,
    pub outdated_count: usize,
    pub broken_count: usize,
    pub tasks_with_refs: usize,
    pub docs_with_refs: usize,
}

fn validate_anchor(anchor: &str) -> Result<(), DocTreeError> {
    if anchor.contains(['\r', '\n', '\t']) {
        return Err(DocTreeError::InvalidRequest(format!(
            "anchor contains invalid whitespace: {anchor:?}"
        )));
    }
    if anchor.chars().count() > MAX_ANCHOR_CHARS {
        return Err(DocTreeError::InvalidRequest(format!(
            "anchor is too long (max {MAX_ANCHOR_CHARS} characters)"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReferenceManager {
    index: Arc<IndexManager>,
}

impl ReferenceManager {
    pub fn new(index: Arc<IndexManager>) -> Self {
        ReferenceManager { index }
    }

    pub fn create_reference(&self, req: CreateReferenceRequest) -> Result<Reference, DocTreeError> {
        let task_id = req.task_id.trim();
        if task_id.is_empty() {
            return Err(DocTreeError::InvalidRequest(
                "task_id is required".to_string(),
            ));
        }
        let anchor = req.anchor.as_deref().map(str::trim).unwrap_or_default();
        validate_anchor(anchor)?;
        let context = req.context.as_deref().map(str::trim).unwrap_or_default();

        let mut state = self.index.write();
        state.get_node(&req.document_id)?;

        let now = Utc::now();
        let reference = Reference {
            id: new_id("ref"),
            task_id: task_id.to_string(),
            document_id: req.document_id.clone(),
            anchor: anchor.to_string(),
            context: context.to_string(),
            status: ReferenceStatus::Active,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        state.insert_reference(reference.clone());
        if let Err(e) = state.flush_references() {
            state.remove_reference(&reference.id);
            return Err(e);
        }
        tracing::debug!(
            "[ReferenceManager] task {} -> document {} as {}",
            reference.task_id,
            reference.document_id,
            reference.id
        );
        Ok(reference)
    }

    pub fn references_by_task(&self, task_id: &str) -> Vec<Reference> {
        self.index
            .read()
            .references_by_task(task_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn references_by_document(&self, document_id: &str) -> Vec<Reference> {
        self.index
            .read()
            .references_by_doc(document_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn find_reference(&self, ref_id: &str) -> Result<Reference, DocTreeError> {
        self.index
            .read()
            .reference(ref_id)
            .cloned()
            .ok_or_else(|| DocTreeError::ReferenceNotFound(ref_id.to_string()))
    }

    pub fn update_reference_status(
        &self,
        ref_id: &str,
        status: ReferenceStatus,
    ) -> Result<Reference, DocTreeError> {
        let mut state = self.index.write();
        let reference = state
            .reference_mut(ref_id)
            .ok_or_else(|| DocTreeError::ReferenceNotFound(ref_id.to_string()))?;
        let previous = reference.clone();
        reference.status = status;
        reference.updated_at = Utc::now();
        let updated = reference.clone();
        if let Err(e) = state.flush_references() {
            if let Some(reference) = state.reference_mut(ref_id) {
                *reference = previous;
            }
            return Err(e);
        }
        Ok(updated)
    }

    pub fn delete_reference(&self, ref_id: &str) -> Result<(), DocTreeError> {
        let mut state = self.index.write();
        let removed = state
            .remove_reference(ref_id)
            .ok_or_else(|| DocTreeError::ReferenceNotFound(ref_id.to_string()))?;
        if let Err(e) = state.flush_references() {
            state.insert_reference(removed);
            return Err(e);
        }
        Ok(())
    }

    /// Flag every active reference to `document_id` as outdated. Returns the number changed.
    pub fn mark_document_references_outdated(
        &self,
        document_id: &str,
    ) -> Result<usize, DocTreeError> {
        let mut state = self.index.write();
        let active = state
            .references_by_doc(document_id)
            .into_iter()
            .filter(|r| r.status == ReferenceStatus::Active)
            .map(|r| r.id.clone())
            .collect::<Vec<_>>();
        if active.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        for id in active.iter() {
            if let Some(reference) = state.reference_mut(id) {
                reference.status = ReferenceStatus::Outdated;
                reference.updated_at = now;
            }
        }
        if let Err(e) = state.flush_references() {
            for id in active.iter() {
                if let Some(reference) = state.reference_mut(id) {
                    reference.status = ReferenceStatus::Active;
                }
            }
            return Err(e);
        }
        Ok(active.len())
    }

    fn with_status(&self, status: ReferenceStatus) -> Vec<Reference> {
        self.index
            .read()
            .references()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    pub fn active_references(&self) -> Vec<Reference> {
        self.with_status(ReferenceStatus::Active)
    }

    pub fn outdated_references(&self) -> Vec<Reference> {
        self.with_status(ReferenceStatus::Outdated)
    }

    pub fn reference_stats(&self) -> ReferenceStats {
        let state = self.index.read();
        let mut stats = ReferenceStats {
            tasks_with_refs: state.task_ids_with_references().count(),
            docs_with_refs: state.document_ids_with_references().count(),
            ..Default::default()
        };
        for reference in state.references().values() {
            stats.total_references += 1;
            match reference.status {
                ReferenceStatus::Active => stats.active_count += 1,
                ReferenceStatus::Outdated => stats.outdated_count += 1,
                ReferenceStatus::Broken => stats.broken_count += 1,
            }
        }
        stats
    }

    pub fn purge_node_references(&self, node_ids: &[String]) -> Result<usize, DocTreeError> {
        let mut state = self.index.write();
        purge_node_references(&mut state, node_ids)
    }
}

/// Remove every reference whose document or task is one of `node_ids`. Guard-held.
pub fn purge_node_references(
    state: &mut IndexState,
    node_ids: &[String],
) -> Result<usize, DocTreeError> {
    let doomed = state
        .references()
        .values()
        .filter(|r| node_ids.contains(&r.document_id) || node_ids.contains(&r.task_id))
        .map(|r| r.id.clone())
        .collect::<Vec<_>>();
    if doomed.is_empty() {
        return Ok(0);
    }
    let removed = doomed
        .iter()
        .filter_map(|id| state.remove_reference(id))
        .collect::<Vec<_>>();
    if let Err(e) = state.flush_references() {
        for reference in removed {
            state.insert_reference(reference);
        }
        return Err(e);
    }
    tracing::debug!("[ReferenceManager] purged {} references", doomed.len());
    Ok(doomed.len())
}

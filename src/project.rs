//! Per-project engine bundles and the registry that hands them out.
//!
//! A [Project] owns exactly one [IndexManager] and the engines built on top of it. A [Workspace]
//! guarantees one [Project] per project id for the life of the process, which is what keeps the
//! single index lock meaningful.
use parking_lot::RwLock;
use std::{collections::HashMap, path::Path, sync::Arc};

use crate::{
    config::{EngineConfig, SearchConfig},
    error::DocTreeError,
    impact::ImpactAnalyzer,
    index::IndexManager,
    references::{self, ReferenceManager},
    relations::{self, RelationshipEngine},
    search::SearchManager,
    tree::DocumentTreeManager,
};

#[derive(Debug)]
pub struct Project {
    id: String,
    index: Arc<IndexManager>,
    tree: DocumentTreeManager,
    relations: RelationshipEngine,
    references: ReferenceManager,
    impact: ImpactAnalyzer,
    search_config: SearchConfig,
}

impl Project {
    /// Load (or initialize) the project stored in `project_dir`.
    pub fn open<P: AsRef<Path>>(
        id: &str,
        project_dir: P,
        config: &EngineConfig,
    ) -> Result<Self, DocTreeError> {
        let index = Arc::new(IndexManager::new(project_dir));
        index.load()?;
        Ok(Project {
            id: id.to_string(),
            tree: DocumentTreeManager::new(index.clone())
                .with_history_retain(config.history.retain),
            relations: RelationshipEngine::new(index.clone()),
            references: ReferenceManager::new(index.clone()),
            impact: ImpactAnalyzer::new(index.clone()),
            search_config: config.search,
            index,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn tree(&self) -> &DocumentTreeManager {
        &self.tree
    }

    pub fn relations(&self) -> &RelationshipEngine {
        &self.relations
    }

    pub fn references(&self) -> &ReferenceManager {
        &self.references
    }

    pub fn impact(&self) -> &ImpactAnalyzer {
        &self.impact
    }

    /// A fresh search engine over this project's index.
    pub fn search(&self) -> SearchManager {
        SearchManager::new(self.index.clone(), self.search_config)
    }

    /// Delete a node (or subtree with `cascade`) and every relationship and reference touching
    /// the removed nodes, all under one exclusive guard. Returns the removed ids.
    pub fn delete_node(&self, node_id: &str, cascade: bool) -> Result<Vec<String>, DocTreeError> {
        let mut state = self.index.write();
        let removed = self.tree.delete_locked(&mut state, node_id, cascade)?;
        let purged = relations::purge_node_relations(&mut state, &removed).and_then(|edges| {
            references::purge_node_references(&mut state, &removed).map(|refs| (edges, refs))
        });
        drop(state);
        self.tree.cleanup_files(&removed);

        match purged {
            Ok((edges, refs)) => {
                tracing::info!(
                    "[Project {}] deleted {} nodes, {edges} relationships, {refs} references",
                    self.id,
                    removed.len()
                );
                Ok(removed)
            }
            Err(e) => {
                tracing::error!(
                    "[Project {}] nodes under {node_id} deleted but edge cleanup failed: {e}",
                    self.id
                );
                Err(e)
            }
        }
    }
}

fn validate_project_id(project_id: &str) -> Result<(), DocTreeError> {
    let valid = !project_id.is_empty()
        && project_id != "."
        && project_id != ".."
        && project_id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(DocTreeError::InvalidRequest(format!(
            "invalid project id '{project_id}'"
        )));
    }
    Ok(())
}

/// Registry of open projects under one [EngineConfig::projects_root].
#[derive(Debug)]
pub struct Workspace {
    config: EngineConfig,
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl Workspace {
    pub fn new(config: EngineConfig) -> Self {
        Workspace {
            config,
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The project for `project_id`, loading it on first use. Concurrent first calls load it
    /// once and share the result.
    pub fn open_project(&self, project_id: &str) -> Result<Arc<Project>, DocTreeError> {
        if let Some(project) = self.projects.read().get(project_id) {
            return Ok(project.clone());
        }
        validate_project_id(project_id)?;

        let mut projects = self.projects.write();
        if let Some(project) = projects.get(project_id) {
            return Ok(project.clone());
        }
        let project = Arc::new(Project::open(
            project_id,
            self.config.project_dir(project_id),
            &self.config,
        )?);
        projects.insert(project_id.to_string(), project.clone());
        tracing::info!("[Workspace] opened project {project_id}");
        Ok(project)
    }

    /// Ids of projects currently held open, sorted.
    pub fn open_projects(&self) -> Vec<String> {
        let mut ids = self.projects.read().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Forget a loaded project. Handles already given out stay valid.
    pub fn close_project(&self, project_id: &str) -> bool {
        self.projects.write().remove(project_id).is_some()
    }
}

//! Impact analysis: which documents are affected when a node changes.
//!
//! Upward and downward traversals are level-by-level BFS over both the tree (`parent_id` and the
//! adjacency) and `parent_child` edges, recording the depth at which each node is first reached
//! and the path from the start node. Traversal stops after [MAX_DEPTH] levels.
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    fmt::{Display, Formatter},
    str::FromStr,
    sync::Arc,
};

use crate::{
    error::DocTreeError,
    index::{IndexManager, IndexState},
    properties::{ReferenceStatus, RelationType},
};

pub const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Parents,
    Children,
    References,
    Dependencies,
    All,
}

impl Display for AnalysisMode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            AnalysisMode::Parents => "parents",
            AnalysisMode::Children => "children",
            AnalysisMode::References => "references",
            AnalysisMode::Dependencies => "dependencies",
            AnalysisMode::All => "all",
        };
        write!(f, "{name}")
    }
}

impl FromStr for AnalysisMode {
    type Err = DocTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "parents" => Ok(AnalysisMode::Parents),
            "children" => Ok(AnalysisMode::Children),
            "references" => Ok(AnalysisMode::References),
            "dependencies" => Ok(AnalysisMode::Dependencies),
            "all" => Ok(AnalysisMode::All),
            other => Err(DocTreeError::InvalidRequest(format!(
                "unknown analysis mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactResult {
    pub node_id: String,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    /// Task ids actively referencing the node, followed by documents co-referenced by those tasks.
    pub references: Vec<String>,
    pub dependencies: Vec<String>,
    pub depth: BTreeMap<String, usize>,
    /// Start node excluded; each path ends with the keyed node.
    pub paths: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ImpactAnalyzer {
    index: Arc<IndexManager>,
}

impl ImpactAnalyzer {
    pub fn new(index: Arc<IndexManager>) -> Self {
        ImpactAnalyzer { index }
    }

    pub fn analyze(
        &self,
        node_id: &str,
        modes: &[AnalysisMode],
    ) -> Result<ImpactResult, DocTreeError> {
        let state = self.index.read();
        analyze(&state, node_id, modes)
    }
}

/// Guard-held analysis.
pub fn analyze(
    state: &IndexState,
    node_id: &str,
    modes: &[AnalysisMode],
) -> Result<ImpactResult, DocTreeError> {
    state.get_node(node_id)?;
    let mut result = ImpactResult {
        node_id: node_id.to_string(),
        ..Default::default()
    };
    let mut done = HashSet::new();
    for mode in modes {
        let expanded = match mode {
            AnalysisMode::All => &[
                AnalysisMode::Parents,
                AnalysisMode::Children,
                AnalysisMode::References,
                AnalysisMode::Dependencies,
            ][..],
            single => std::slice::from_ref(single),
        };
        for mode in expanded {
            if !done.insert(*mode) {
                continue;
            }
            match mode {
                AnalysisMode::Parents => {
                    result.parents = walk(state, node_id, &mut result, upward_neighbours)
                }
                AnalysisMode::Children => {
                    result.children = walk(state, node_id, &mut result, downward_neighbours)
                }
                AnalysisMode::References => analyze_references(state, node_id, &mut result),
                AnalysisMode::Dependencies => analyze_dependencies(state, node_id, &mut result),
                AnalysisMode::All => {}
            }
        }
    }
    Ok(result)
}

fn upward_neighbours(state: &IndexState, current: &str) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(meta) = state.get_node(current) {
        if let Some(parent_id) = meta.parent_id.as_ref() {
            out.push(parent_id.clone());
        }
    }
    out.extend(
        state
            .relationships()
            .values()
            .filter(|rel| rel.to_id == current && rel.rel_type == RelationType::ParentChild)
            .map(|rel| rel.from_id.clone()),
    );
    out
}

fn downward_neighbours(state: &IndexState, current: &str) -> Vec<String> {
    let mut out = state.get_children(current);
    out.extend(
        state
            .relationships()
            .values()
            .filter(|rel| rel.from_id == current && rel.rel_type == RelationType::ParentChild)
            .map(|rel| rel.to_id.clone()),
    );
    out
}

fn walk(
    state: &IndexState,
    start: &str,
    result: &mut ImpactResult,
    neighbours: fn(&IndexState, &str) -> Vec<String>,
) -> Vec<String> {
    let mut found = Vec::new();
    let mut visited = HashSet::from([start.to_string()]);
    let mut frontier = vec![start.to_string()];
    let mut paths: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for depth in 1..=MAX_DEPTH {
        let mut next = Vec::new();
        for current in frontier.iter() {
            for neighbour in neighbours(state, current) {
                if !visited.insert(neighbour.clone()) {
                    continue;
                }
                let mut path = paths.get(current).cloned().unwrap_or_default();
                path.push(neighbour.clone());
                paths.insert(neighbour.clone(), path);
                result.depth.entry(neighbour.clone()).or_insert(depth);
                found.push(neighbour.clone());
                next.push(neighbour);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    for (id, path) in paths {
        result.paths.entry(id).or_insert(path);
    }
    found
}

fn analyze_references(state: &IndexState, node_id: &str, result: &mut ImpactResult) {
    let mut seen = HashSet::new();
    let mut references = Vec::new();
    let tasks = state
        .references_by_doc(node_id)
        .into_iter()
        .filter(|r| r.status == ReferenceStatus::Active)
        .map(|r| r.task_id.clone())
        .collect::<Vec<_>>();
    for task_id in tasks.iter() {
        if seen.insert(task_id.clone()) {
            references.push(task_id.clone());
        }
    }
    for task_id in tasks.iter() {
        for reference in state.references_by_task(task_id) {
            if reference.status == ReferenceStatus::Active
                && reference.document_id != node_id
                && seen.insert(reference.document_id.clone())
            {
                references.push(reference.document_id.clone());
            }
        }
    }
    result.references = references;
}

fn analyze_dependencies(state: &IndexState, node_id: &str, result: &mut ImpactResult) {
    let mut dependencies = Vec::new();
    let mut visited = HashSet::from([node_id.to_string()]);
    let mut queue = VecDeque::from([node_id.to_string()]);
    while let Some(current) = queue.pop_front() {
        for rel in state.relationships().values() {
            if rel.from_id == current
                && rel.rel_type != RelationType::ParentChild
                && visited.insert(rel.to_id.clone())
            {
                dependencies.push(rel.to_id.clone());
                queue.push_back(rel.to_id.clone());
            }
        }
    }
    result.dependencies = dependencies;
}

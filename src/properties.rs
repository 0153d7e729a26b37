//! [crate::properties] holds the data model shared by every engine component: document nodes,
//! relationships between them, task references, and the request/response shapes the handler
//! layer exchanges with the engine.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};
use uuid::Uuid;

use crate::error::DocTreeError;

/// Deepest permitted level. Roots are level 1.
pub const MAX_LEVEL: u32 = 5;
/// A parent may hold at most this many direct children.
pub const MAX_CHILDREN_PER_NODE: usize = 50;
/// Id of the synthetic node whose children are the true root documents.
pub const VIRTUAL_ROOT_ID: &str = "virtual_root";

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    FeatureList,
    Architecture,
    TechDesign,
    Background,
    Requirements,
    Meeting,
    Task,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::FeatureList,
        DocumentType::Architecture,
        DocumentType::TechDesign,
        DocumentType::Background,
        DocumentType::Requirements,
        DocumentType::Meeting,
        DocumentType::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::FeatureList => "feature_list",
            DocumentType::Architecture => "architecture",
            DocumentType::TechDesign => "tech_design",
            DocumentType::Background => "background",
            DocumentType::Requirements => "requirements",
            DocumentType::Meeting => "meeting",
            DocumentType::Task => "task",
        }
    }
}

impl Display for DocumentType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = DocTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| DocTreeError::InvalidRequest(format!("unknown document type '{s}'")))
    }
}

/// Index entry for one document node. The body lives in the `<id>.md` sidecar file, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetaEntry {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub level: u32,
    pub position: usize,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DocMetaEntry {
    pub fn validate_level(&self) -> Result<(), DocTreeError> {
        if self.level > MAX_LEVEL {
            return Err(DocTreeError::HierarchyOverflow);
        }
        Ok(())
    }

    /// Key of this node's bucket in the parent -> children adjacency.
    pub fn parent_key(&self) -> &str {
        self.parent_id.as_deref().unwrap_or(VIRTUAL_ROOT_ID)
    }

    pub(crate) fn virtual_root() -> DocMetaEntry {
        let now = Utc::now();
        DocMetaEntry {
            id: VIRTUAL_ROOT_ID.to_string(),
            parent_id: None,
            title: "Root".to_string(),
            doc_type: DocumentType::FeatureList,
            level: 0,
            position: 0,
            version: 0,
            updated_at: now,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTree {
    pub node: DocMetaEntry,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocumentTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    #[serde(default)]
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveNodeRequest {
    #[serde(default)]
    pub new_parent_id: Option<String>,
    #[serde(default)]
    pub position: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub doc_type: Option<DocumentType>,
}

/// Relationship kinds. `ParentChild` and `Sibling` are system-maintained (explicit); `Reference`
/// edges are created by users (implicit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    ParentChild,
    Sibling,
    Reference,
}

impl RelationType {
    pub fn is_explicit(&self) -> bool {
        matches!(self, RelationType::ParentChild | RelationType::Sibling)
    }
}

/// Refines a `Reference` relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Data,
    Interface,
    Config,
}

impl FromStr for DependencyType {
    type Err = DocTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "data" => Ok(DependencyType::Data),
            "interface" => Ok(DependencyType::Interface),
            "config" => Ok(DependencyType::Config),
            other => Err(DocTreeError::InvalidRequest(format!(
                "unknown dependency type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<DependencyType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub(crate) fn new(from_id: &str, to_id: &str, rel_type: RelationType) -> Self {
        let now = Utc::now();
        Relationship {
            id: new_id("rel"),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            rel_type,
            dependency_type: None,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.from_id == node_id || self.to_id == node_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRelationshipRequest {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    #[serde(default)]
    pub dependency_type: Option<DependencyType>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Active,
    Outdated,
    Broken,
}

/// Anchors a task to a (section of a) document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub task_id: String,
    pub document_id: String,
    #[serde(default)]
    pub anchor: String,
    #[serde(default)]
    pub context: String,
    pub status: ReferenceStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateReferenceRequest {
    pub task_id: String,
    pub document_id: String,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_document_type_wire_names() {
        for doc_type in DocumentType::ALL {
            let json = serde_json::to_string(&doc_type).unwrap();
            assert_eq!(json, format!("\"{}\"", doc_type.as_str()));
            assert_eq!(DocumentType::from_str(doc_type.as_str()).unwrap(), doc_type);
        }
        assert!(DocumentType::from_str("novel").is_err());
    }

    #[test]
    fn test_meta_entry_serializes_type_key() {
        let mut meta = DocMetaEntry::virtual_root();
        meta.doc_type = DocumentType::TechDesign;
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["type"], "tech_design");
        assert!(value["parent_id"].is_null());
        assert_eq!(meta.parent_key(), VIRTUAL_ROOT_ID);
    }

    #[test]
    fn test_level_validation() {
        let mut meta = DocMetaEntry::virtual_root();
        meta.level = MAX_LEVEL;
        assert!(meta.validate_level().is_ok());
        meta.level = MAX_LEVEL + 1;
        assert_eq!(meta.validate_level(), Err(DocTreeError::HierarchyOverflow));
    }

    #[test]
    fn test_relationship_omits_empty_optionals() {
        let rel = Relationship::new("doc_a", "doc_b", RelationType::Sibling);
        let value = serde_json::to_value(&rel).unwrap();
        assert!(value.get("dependency_type").is_none());
        assert!(value.get("description").is_none());
        assert!(rel.id.starts_with("rel_"));
        assert!(rel.touches("doc_b"));
        assert!(!rel.touches("doc_c"));
    }
}

use std::io;

use http::status::StatusCode;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

/// Every fallible engine operation returns this error. The first block of variants are the
/// sentinels callers match on to pick a response; the rest wrap ambient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum DocTreeError {
    #[error("DOC_NODE_NOT_FOUND: {0}")]
    NodeNotFound(String),
    #[error("CIRCULAR_DEPENDENCY")]
    CircularDependency,
    #[error("INVALID_HIERARCHY: {0}")]
    InvalidHierarchy(String),
    #[error("VERSION_MISMATCH: stored version is {actual}, client sent {expected}")]
    VersionMismatch { expected: u64, actual: u64 },
    #[error("HIERARCHY_OVERFLOW")]
    HierarchyOverflow,
    #[error("CHILDREN_LIMIT_REACHED")]
    ChildrenLimitReached,
    #[error("relationship already exists")]
    DuplicateRelation,
    #[error("relationship not found")]
    RelationNotFound,

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),
    #[error("snapshot version {version} not found for node {node_id}")]
    SnapshotNotFound { node_id: String, version: u64 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl DocTreeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DocTreeError::NodeNotFound(_) => StatusCode::NOT_FOUND,
            DocTreeError::CircularDependency => StatusCode::BAD_REQUEST,
            DocTreeError::InvalidHierarchy(_) => StatusCode::BAD_REQUEST,
            DocTreeError::VersionMismatch { .. } => StatusCode::CONFLICT,
            DocTreeError::HierarchyOverflow => StatusCode::BAD_REQUEST,
            DocTreeError::ChildrenLimitReached => StatusCode::BAD_REQUEST,
            DocTreeError::DuplicateRelation => StatusCode::CONFLICT,
            DocTreeError::RelationNotFound => StatusCode::NOT_FOUND,
            DocTreeError::ReferenceNotFound(_) => StatusCode::NOT_FOUND,
            DocTreeError::SnapshotNotFound { .. } => StatusCode::NOT_FOUND,
            DocTreeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DocTreeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DocTreeError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, paired with [DocTreeError::status_code] in responses.
    pub fn code(&self) -> &'static str {
        match self {
            DocTreeError::NodeNotFound(_) => "DOC_NODE_NOT_FOUND",
            DocTreeError::CircularDependency => "CIRCULAR_DEPENDENCY",
            DocTreeError::InvalidHierarchy(_) => "INVALID_HIERARCHY",
            DocTreeError::VersionMismatch { .. } => "VERSION_MISMATCH",
            DocTreeError::HierarchyOverflow => "HIERARCHY_OVERFLOW",
            DocTreeError::ChildrenLimitReached => "CHILDREN_LIMIT_REACHED",
            DocTreeError::DuplicateRelation => "DUPLICATE_RELATION",
            DocTreeError::RelationNotFound => "RELATION_NOT_FOUND",
            DocTreeError::ReferenceNotFound(_) => "REFERENCE_NOT_FOUND",
            DocTreeError::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            DocTreeError::InvalidRequest(_) => "INVALID_REQUEST",
            DocTreeError::Io(_) => "IO_ERROR",
            DocTreeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == StatusCode::NOT_FOUND
    }
}

impl From<io::Error> for DocTreeError {
    fn from(x: io::Error) -> Self {
        DocTreeError::Io(format!("IOError ({}): {x}", x.kind()))
    }
}

impl From<JsonError> for DocTreeError {
    fn from(src: JsonError) -> DocTreeError {
        DocTreeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for DocTreeError {
    fn from(src: toml::de::Error) -> DocTreeError {
        DocTreeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for DocTreeError {
    fn from(src: toml::ser::Error) -> DocTreeError {
        DocTreeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<RegexError> for DocTreeError {
    fn from(x: RegexError) -> Self {
        DocTreeError::InvalidRequest(format!("Regex parse failed: {x}"))
    }
}

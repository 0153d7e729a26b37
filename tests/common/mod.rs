//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use doctree_core::{
    config::EngineConfig,
    project::{Project, Workspace},
    properties::{CreateNodeRequest, DocMetaEntry, DocumentType},
};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A workspace rooted at `<temp_dir>/projects`.
#[allow(dead_code)]
pub fn create_workspace(temp_dir: &TempDir) -> Workspace {
    Workspace::new(EngineConfig {
        projects_root: temp_dir.path().join("projects"),
        ..Default::default()
    })
}

#[allow(dead_code)]
pub fn create_doc(
    project: &Project,
    parent: Option<&str>,
    title: &str,
    doc_type: DocumentType,
    content: &str,
) -> DocMetaEntry {
    project
        .tree()
        .create_node(CreateNodeRequest {
            parent_id: parent.map(str::to_string),
            title: title.to_string(),
            doc_type,
            content: content.to_string(),
        })
        .expect("Failed to create document")
}

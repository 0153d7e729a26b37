//! # doctree-core
//!
//! A hierarchical, versioned document store backed by plain files.
//!
//! ## Overview
//!
//! doctree-core keeps a project's documents as a tree of nodes (feature lists, architecture notes,
//! requirements, meeting notes, ...). Metadata lives in three JSON indices; each node's body is a
//! Markdown sidecar file. On top of that the engine tracks typed relationships between documents,
//! task references into them, a snapshot history with line diffs, and full-text search.
//!
//! ### Key Features
//!
//! - **Bounded hierarchy**: at most 5 levels, at most 50 children per parent, checked before any
//!   mutation
//! - **Optimistic concurrency**: content writes carry the version the client saw and fail with
//!   [DocTreeError::VersionMismatch] if someone got there first
//! - **Version history**: the previous body is snapshotted before every overwrite; any two
//!   versions can be diffed
//! - **Cycle-free relationships**: explicit (`parent_child`, `sibling`) and implicit (`reference`)
//!   edges, with cycle detection on insert
//! - **Search**: literal, whole-word or regex queries with relevance scoring and suggestions
//! - **Crash-safe persistence**: every index write is a write-to-temp then rename
//!
//! ## Architecture
//!
//! - **[`index`]**: `IndexManager`, the single lock-guarded source of truth for a project
//! - **[`tree`]**: `DocumentTreeManager`, node lifecycle and versioned content
//! - **[`relations`]**: `RelationshipEngine`, edges and cycle detection
//! - **[`references`]**: `ReferenceManager`, task -> document anchors
//! - **[`search`]**: `SearchManager`, full-text search and suggestions
//! - **[`differ`]**: `ContentDiffer`, bounded-lookahead line diff
//! - **[`snapshot`]**: `SnapshotStore` trait and its file-backed implementation
//! - **[`impact`]**: `ImpactAnalyzer`, which documents a change affects
//! - **[`project`]**: `Project` bundles and the `Workspace` registry
//! - **[`config`]**: `EngineConfig`, loaded from TOML
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doctree_core::{
//!     config::EngineConfig,
//!     project::Workspace,
//!     properties::{CreateNodeRequest, DocumentType},
//!     search::SearchOptions,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workspace = Workspace::new(EngineConfig::load("doctree.toml")?);
//!     let project = workspace.open_project("demo")?;
//!
//!     let root = project.tree().create_node(CreateNodeRequest {
//!         parent_id: None,
//!         title: "Roadmap".to_string(),
//!         doc_type: DocumentType::FeatureList,
//!         content: "# Roadmap\n".to_string(),
//!     })?;
//!
//!     // Writers must present the version they read.
//!     let version = project
//!         .tree()
//!         .update_content(&root.id, "# Roadmap\n\n- search\n", root.version)?;
//!     assert_eq!(version, 2);
//!
//!     for hit in project.search().search_documents(&SearchOptions::new("search"))? {
//!         println!("{} ({})", hit.title, hit.score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## On-disk Layout
//!
//! ```text
//! <projects_root>/<project_id>/documents/
//!   documents_index.json
//!   relationships_index.json
//!   references_index.json
//!   doc_<uuid>.md
//!   .history/doc_<uuid>/{1.md, 2.md, snapshots.json}
//! ```
//!
//! ## Consistency
//!
//! One [parking_lot::RwLock] per project guards documents, adjacency, relationships and
//! references together. Every write operation holds the exclusive guard for its entire
//! check-mutate-persist sequence. [tree::DocumentTreeManager::get_content] reads the body under the
//! shared guard; search reads bodies after releasing it and may observe a body one write ahead of
//! the metadata it reports.
pub mod config;
pub mod differ;
pub mod error;
pub mod fsutil;
pub mod impact;
pub mod index;
pub mod project;
pub mod properties;
pub mod references;
pub mod relations;
pub mod search;
pub mod snapshot;
pub mod tree;

pub use error::*;

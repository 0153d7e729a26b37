use super::*;
use crate::{
    index::DOCUMENTS_INDEX_FILE,
    properties::{DocumentType, MAX_CHILDREN_PER_NODE, VIRTUAL_ROOT_ID},
};
use tempfile::{tempdir, TempDir};
use test_log::test;

fn setup() -> (TempDir, DocumentTreeManager) {
    let dir = tempdir().unwrap();
    let index = Arc::new(IndexManager::new(dir.path().join("documents")));
    let manager = DocumentTreeManager::new(index);
    manager.initialize().unwrap();
    (dir, manager)
}

fn create(manager: &DocumentTreeManager, parent: Option<&str>, title: &str) -> DocMetaEntry {
    manager
        .create_node(CreateNodeRequest {
            parent_id: parent.map(str::to_string),
            title: title.to_string(),
            doc_type: DocumentType::FeatureList,
            content: format!("# {title}\n"),
        })
        .unwrap()
}

/// Replace the documents index file with a non-empty directory so the next flush cannot rename
/// over it.
fn break_documents_flush(manager: &DocumentTreeManager) {
    let path = manager.index().project_dir().join(DOCUMENTS_INDEX_FILE);
    fs::remove_file(&path).unwrap();
    fs::create_dir_all(path.join("blocker")).unwrap();
}

#[derive(Debug)]
struct FailingSnapshots;

impl SnapshotStore for FailingSnapshots {
    fn create_snapshot(&self, _: &str, _: u64, _: &str) -> Result<(), DocTreeError> {
        Err(DocTreeError::Io("disk full".into()))
    }

    fn list_snapshots(&self, _: &str, _: usize) -> Result<Vec<SnapshotMeta>, DocTreeError> {
        Ok(Vec::new())
    }

    fn get_snapshot(&self, node_id: &str, version: u64) -> Result<String, DocTreeError> {
        Err(DocTreeError::SnapshotNotFound {
            node_id: node_id.to_string(),
            version,
        })
    }

    fn cleanup(&self, _: &str, _: usize) -> Result<(), DocTreeError> {
        Err(DocTreeError::Io("disk full".into()))
    }
}

#[test]
fn test_get_tree_with_virtual_root() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");
    let c = create(&manager, Some(&a.id), "C");
    assert_eq!((a.level, b.level, c.level), (1, 2, 2));
    assert_eq!((b.position, c.position), (0, 1));

    let tree = manager.get_tree(None, 2).unwrap();
    assert_eq!(tree.node.id, VIRTUAL_ROOT_ID);
    assert_eq!(tree.node.level, 0);
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].node.id, a.id);
    let grandchildren = tree.children[0]
        .children
        .iter()
        .map(|t| t.node.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(grandchildren, vec![b.id.as_str(), c.id.as_str()]);

    let shallow = manager.get_tree(Some(&a.id), 0).unwrap();
    assert!(shallow.children.is_empty());
    assert_eq!(
        manager.get_tree(Some("doc_missing"), 1),
        Err(DocTreeError::NodeNotFound("doc_missing".into()))
    );
}

#[test]
fn test_update_content_then_history_shows_live_version() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");

    assert_eq!(manager.update_content(&b.id, "hello", 1).unwrap(), 2);

    let history = manager.get_version_history(&b.id, 10).unwrap();
    let versions = history.iter().map(|s| s.version).collect::<Vec<_>>();
    assert_eq!(versions, vec![2, 1]);
    assert_eq!(manager.get_version_content(&b.id, 2).unwrap(), "hello");
    assert_eq!(manager.get_version_content(&b.id, 1).unwrap(), "# B\n");
}

#[test]
fn test_history_for_untouched_node_is_synthesized() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let history = manager.get_version_history(&a.id, 0).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].size, "# A\n".len() as u64);
}

#[test]
fn test_version_monotonic_and_stale_writes_rejected() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    for expected in 1..=4u64 {
        let next = manager
            .update_content(&a.id, &format!("body {expected}"), expected)
            .unwrap();
        assert_eq!(next, expected + 1);
    }

    let stale = manager.update_content(&a.id, "lost update", 2);
    assert_eq!(
        stale,
        Err(DocTreeError::VersionMismatch {
            expected: 2,
            actual: 5
        })
    );
    let current = manager.get_content(&a.id).unwrap();
    assert_eq!(current.meta.version, 5);
    assert_eq!(current.content, "body 4");
}

#[test]
fn test_hierarchy_overflow_leaves_index_untouched() {
    let (_dir, manager) = setup();
    let mut parent = create(&manager, None, "L1");
    for level in 2..=5 {
        let child = create(&manager, Some(&parent.id), &format!("L{level}"));
        assert_eq!(child.level, level);
        let stored_parent = manager.index().get_node(&parent.id).unwrap();
        assert_eq!(child.level, stored_parent.level + 1);
        parent = child;
    }
    let before = manager.index().list_all_documents().len();
    let overflow = manager.create_node(CreateNodeRequest {
        parent_id: Some(parent.id.clone()),
        title: "L6".into(),
        doc_type: DocumentType::Task,
        content: String::new(),
    });
    assert_eq!(overflow, Err(DocTreeError::HierarchyOverflow));
    assert_eq!(manager.index().list_all_documents().len(), before);
}

#[test]
fn test_children_cap() {
    let (_dir, manager) = setup();
    let root = create(&manager, None, "root");
    for i in 0..MAX_CHILDREN_PER_NODE {
        let child = create(&manager, Some(&root.id), &format!("child {i}"));
        assert_eq!(child.position, i);
    }
    let extra = manager.create_node(CreateNodeRequest {
        parent_id: Some(root.id.clone()),
        title: "one too many".into(),
        doc_type: DocumentType::Meeting,
        content: String::new(),
    });
    assert_eq!(extra, Err(DocTreeError::ChildrenLimitReached));
    assert_eq!(
        manager.index().get_children(&root.id).len(),
        MAX_CHILDREN_PER_NODE
    );
}

#[test]
fn test_create_rejects_blank_title_and_missing_parent() {
    let (_dir, manager) = setup();
    let blank = manager.create_node(CreateNodeRequest {
        parent_id: None,
        title: "   ".into(),
        doc_type: DocumentType::Background,
        content: String::new(),
    });
    assert!(matches!(blank, Err(DocTreeError::InvalidRequest(_))));

    let orphan = manager.create_node(CreateNodeRequest {
        parent_id: Some("doc_nope".into()),
        title: "orphan".into(),
        doc_type: DocumentType::Background,
        content: String::new(),
    });
    assert_eq!(orphan, Err(DocTreeError::NodeNotFound("doc_nope".into())));
}

#[test]
fn test_create_rolls_back_when_flush_fails() {
    let (_dir, manager) = setup();
    break_documents_flush(&manager);
    let result = manager.create_node(CreateNodeRequest {
        parent_id: None,
        title: "doomed".into(),
        doc_type: DocumentType::Background,
        content: "text".into(),
    });
    assert!(matches!(result, Err(DocTreeError::Io(_))));
    assert!(manager.index().list_all_documents().is_empty());
    assert!(manager.index().get_roots().is_empty());
}

#[test]
fn test_move_relevels_subtree_and_orders_by_position() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, None, "B");
    let a1 = create(&manager, Some(&a.id), "A1");
    let a1x = create(&manager, Some(&a1.id), "A1x");
    let b1 = create(&manager, Some(&b.id), "B1");

    let moved = manager
        .move_node(
            &a1.id,
            MoveNodeRequest {
                new_parent_id: Some(b1.id.clone()),
                position: 0,
            },
        )
        .unwrap();
    assert_eq!(moved.level, 3);
    assert_eq!(manager.index().get_node(&a1x.id).unwrap().level, 4);
    assert!(manager.index().get_children(&a.id).is_empty());
    assert_eq!(manager.index().get_children(&b1.id), vec![a1.id.clone()]);

    // Back to the root list, placed before A.
    manager
        .move_node(
            &a1.id,
            MoveNodeRequest {
                new_parent_id: None,
                position: 0,
            },
        )
        .unwrap();
    let roots = manager.index().get_roots();
    assert_eq!(roots[0..2].to_vec(), {
        let mut expected = vec![a.id.clone(), a1.id.clone()];
        expected.sort();
        expected
    });
    assert_eq!(roots[2], b.id);
    assert_eq!(manager.index().get_node(&a1x.id).unwrap().level, 2);
}

#[test]
fn test_move_rejects_cycles_and_overflow() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");
    let c = create(&manager, Some(&b.id), "C");

    for target in [&a.id, &c.id] {
        assert_eq!(
            manager.move_node(
                &a.id,
                MoveNodeRequest {
                    new_parent_id: Some(target.clone()),
                    position: 0,
                },
            ),
            Err(DocTreeError::CircularDependency)
        );
    }

    // A deep chain under D leaves no room for the three levels of A's subtree.
    let d = create(&manager, None, "D");
    let d2 = create(&manager, Some(&d.id), "D2");
    let d3 = create(&manager, Some(&d2.id), "D3");
    assert_eq!(
        manager.move_node(
            &a.id,
            MoveNodeRequest {
                new_parent_id: Some(d3.id.clone()),
                position: 0,
            },
        ),
        Err(DocTreeError::HierarchyOverflow)
    );
    assert_eq!(manager.index().get_node(&a.id).unwrap().level, 1);
    assert_eq!(manager.index().get_node(&c.id).unwrap().level, 3);
    assert_eq!(manager.index().get_node(&a.id).unwrap().parent_id, None);
}

#[test]
fn test_update_node_fields() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    assert!(matches!(
        manager.update_node(&a.id, UpdateNodeRequest::default()),
        Err(DocTreeError::InvalidRequest(_))
    ));
    assert!(matches!(
        manager.update_node(
            &a.id,
            UpdateNodeRequest {
                title: Some(" ".into()),
                doc_type: None
            }
        ),
        Err(DocTreeError::InvalidRequest(_))
    ));
    let updated = manager
        .update_node(
            &a.id,
            UpdateNodeRequest {
                title: Some("  Renamed ".into()),
                doc_type: Some(DocumentType::Architecture),
            },
        )
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.doc_type, DocumentType::Architecture);
    assert_eq!(updated.version, a.version);
}

#[test]
fn test_delete_requires_cascade_for_parents() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");
    let c = create(&manager, Some(&b.id), "C");
    manager.update_content(&c.id, "history", 1).unwrap();

    assert!(matches!(
        manager.delete_node(&a.id, false),
        Err(DocTreeError::InvalidRequest(_))
    ));
    assert_eq!(manager.index().list_all_documents().len(), 3);

    let removed = manager.delete_node(&a.id, true).unwrap();
    assert_eq!(removed, vec![c.id.clone(), b.id.clone(), a.id.clone()]);
    assert!(manager.index().list_all_documents().is_empty());
    for id in removed {
        assert!(!manager.index().content_path(&id).exists());
    }
    assert!(manager.snapshots().list_snapshots(&c.id, 0).unwrap().is_empty());
    assert_eq!(
        manager.delete_node(&a.id, true),
        Err(DocTreeError::NodeNotFound(a.id.clone()))
    );
}

#[test]
fn test_failed_cascade_delete_restores_whole_subtree() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");
    create(&manager, Some(&b.id), "C");
    create(&manager, Some(&a.id), "D");

    break_documents_flush(&manager);
    assert!(matches!(
        manager.delete_node(&a.id, true),
        Err(DocTreeError::Io(_))
    ));
    assert_eq!(manager.index().list_all_documents().len(), 4);
    assert_eq!(manager.index().get_children(&a.id).len(), 2);
    assert_eq!(manager.index().get_children(&b.id).len(), 1);
    assert!(manager.index().content_path(&b.id).exists());
}

#[test]
fn test_snapshot_failure_does_not_block_write() {
    let dir = tempdir().unwrap();
    let index = Arc::new(IndexManager::new(dir.path()));
    let manager = DocumentTreeManager::with_snapshot_store(index, Arc::new(FailingSnapshots))
        .with_history_retain(Some(1));
    manager.initialize().unwrap();
    let a = create(&manager, None, "A");

    assert_eq!(manager.update_content(&a.id, "new body", 1).unwrap(), 2);
    assert_eq!(manager.get_content(&a.id).unwrap().content, "new body");
    assert!(matches!(
        manager.get_version_content(&a.id, 1),
        Err(DocTreeError::SnapshotNotFound { .. })
    ));
}

#[test]
fn test_compare_versions() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    manager.update_content(&a.id, "one\ntwo\nthree", 1).unwrap();
    manager
        .update_content(&a.id, "one\ntwo\nthree\nfour", 2)
        .unwrap();

    let diff = manager.compare_versions(&a.id, 2, 0).unwrap();
    assert_eq!(diff.from_version, 2);
    assert_eq!(diff.to_version, 3);
    assert_eq!(diff.summary.added, 1);
    assert_eq!(diff.summary.total, 1);

    let same = manager.compare_versions(&a.id, 3, 3).unwrap();
    assert!(same.summary.is_unchanged());

    assert!(matches!(
        manager.compare_versions(&a.id, 1, 9),
        Err(DocTreeError::SnapshotNotFound { version: 9, .. })
    ));
}

#[test]
fn test_history_retention_prunes_old_snapshots() {
    let dir = tempdir().unwrap();
    let index = Arc::new(IndexManager::new(dir.path()));
    let manager = DocumentTreeManager::new(index).with_history_retain(Some(2));
    manager.initialize().unwrap();
    let a = create(&manager, None, "A");
    for version in 1..=4 {
        manager
            .update_content(&a.id, &format!("v{}", version + 1), version)
            .unwrap();
    }
    let stored = manager.snapshots().list_snapshots(&a.id, 0).unwrap();
    assert_eq!(
        stored.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![4, 3]
    );
    let history = manager.get_version_history(&a.id, 0).unwrap();
    assert_eq!(
        history.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![5, 4, 3]
    );
}

#[test]
fn test_retention_holds_under_concurrent_writers() {
    let dir = tempdir().unwrap();
    let index = Arc::new(IndexManager::new(dir.path().join("documents")));
    let manager = DocumentTreeManager::new(index).with_history_retain(Some(3));
    manager.initialize().unwrap();
    let a = create(&manager, None, "A");

    std::thread::scope(|scope| {
        for writer in 0..4 {
            let manager = &manager;
            let id = a.id.as_str();
            scope.spawn(move || {
                let mut written = 0;
                while written < 25 {
                    let seen = manager.index().get_node(id).unwrap().version;
                    match manager.update_content(id, &format!("writer {writer} #{written}"), seen) {
                        Ok(_) => written += 1,
                        Err(DocTreeError::VersionMismatch { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
    });

    let current = manager.index().get_node(&a.id).unwrap().version;
    assert_eq!(current, 101);
    let stored = manager.snapshots().list_snapshots(&a.id, 0).unwrap();
    assert_eq!(
        stored.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![100, 99, 98]
    );
    let history_dir = manager.index().project_dir().join(".history").join(&a.id);
    let mut on_disk = fs::read_dir(&history_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    on_disk.sort();
    assert_eq!(on_disk, vec!["100.md", "98.md", "99.md", "snapshots.json"]);
}

#[test]
fn test_new_child_after_delete_shares_position_and_sorts_by_id() {
    let (_dir, manager) = setup();
    let parent = create(&manager, None, "Parent");
    let first = create(&manager, Some(&parent.id), "First");
    let second = create(&manager, Some(&parent.id), "Second");
    assert_eq!(second.position, 1);

    manager.delete_node(&first.id, false).unwrap();
    // Positions are not compacted: the newcomer takes the sibling count as its position.
    let third = create(&manager, Some(&parent.id), "Third");
    assert_eq!(third.position, 1);
    assert_eq!(manager.index().get_node(&second.id).unwrap().position, 1);

    let mut expected = vec![second.id.clone(), third.id.clone()];
    expected.sort();
    assert_eq!(manager.index().get_children(&parent.id), expected);
}

#[test]
fn test_analyze_impact_through_tree_manager() {
    let (_dir, manager) = setup();
    let a = create(&manager, None, "A");
    let b = create(&manager, Some(&a.id), "B");
    let result = manager
        .analyze_impact(&b.id, &[AnalysisMode::Parents])
        .unwrap();
    assert_eq!(result.parents, vec![a.id]);
}

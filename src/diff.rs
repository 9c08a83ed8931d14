//! Node-by-node comparison of two trees.
//!
//! [`diff`] returns a tree holding exactly one node for every path that exists
//! in either input, each tagged with a [`DiffType`]. Whiteout markers count as
//! absence on both sides, so a path deleted by the compare tree shows up as a
//! `Removed` node carrying the base's data.
//!
//! Classification is decided bottom-up: a node present on both sides is
//! `Modified` when its own [`FileInfo`](crate::FileInfo) differs or when any of
//! its children is not `Unmodified`.

use crate::file_node::{DiffType, FileNode};
use crate::file_tree::FileTree;
use std::collections::BTreeSet;

pub fn diff(base: &FileTree, compare: &FileTree) -> FileTree {
    FileTree::from_root(diff_node(Some(base.root()), compare.root()))
}

fn existing<'a>(node: Option<&'a FileNode>, name: &str) -> Option<&'a FileNode> {
    node.and_then(|node| node.child(name))
        .filter(|child| !child.is_whiteout())
}

fn diff_node(base: Option<&FileNode>, compare: &FileNode) -> FileNode {
    let mut result = compare.without_children();

    let names: BTreeSet<&str> = compare
        .children()
        .chain(base.into_iter().flat_map(|node| node.children()))
        .filter(|child| !child.is_whiteout())
        .map(FileNode::name)
        .collect();

    for name in names {
        let child = match (existing(base, name), existing(Some(compare), name)) {
            (base_child, Some(compare_child)) => diff_node(base_child, compare_child),
            (Some(base_child), None) => removed(base_child),
            (None, None) => continue,
        };
        result.children_mut().insert(name.to_string(), child);
    }

    let diff_type = match base {
        None => DiffType::Added,
        Some(base) if !base.info().same_content(compare.info()) => DiffType::Modified,
        Some(_) if result.children().any(|c| c.diff_type() != DiffType::Unmodified) => {
            DiffType::Modified
        }
        Some(_) => DiffType::Unmodified,
    };
    result.set_diff_type(diff_type);
    result
}

fn removed(base: &FileNode) -> FileNode {
    let mut node = base.clone();
    node.remove_whiteouts();
    node.assign_diff_type_recursive(DiffType::Removed);
    node
}

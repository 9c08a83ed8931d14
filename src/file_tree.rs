//! Path-addressed tree of [`FileNode`]s for one layer (or a squash of several).
//!
//! Paths are `/`-separated and may start with `/`. Every segment must be a
//! plain name: empty segments, `.` and `..` are rejected with
//! [`Error::MalformedPath`] rather than normalized, so two spellings of the
//! same path can never land on different nodes.
//!
//! Siblings are kept sorted by name, which makes both depth-first walks
//! reproducible no matter in which order entries were inserted.

use crate::error::{Error, Result};
use crate::file_node::{FileInfo, FileNode};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::convert::Infallible;

/// Archive entry name prefix marking a deleted path.
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// Archive entry name marking its parent directory as opaque.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    root: FileNode,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let malformed = |reason| Error::MalformedPath {
        path: path.to_string(),
        reason,
    };

    let relative = path.strip_prefix('/').unwrap_or(path);
    if relative.is_empty() {
        return Err(malformed("path names no entry"));
    }

    let segments: Vec<&str> = relative.split('/').collect();
    for segment in &segments {
        match *segment {
            "" => return Err(malformed("empty path segment")),
            "." | ".." => return Err(malformed("relative path segment")),
            _ => {}
        }
    }
    Ok(segments)
}

fn accept_all(_: &FileNode) -> bool {
    true
}

fn is_root_path(path: &str) -> bool {
    path.is_empty() || path == "/"
}

impl FileTree {
    pub fn new() -> Self {
        Self {
            root: FileNode::root(),
        }
    }

    pub(crate) fn from_root(root: FileNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &FileNode {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut FileNode {
        &mut self.root
    }

    /// Creates or overwrites the node at `path`.
    ///
    /// Missing intermediate directories are created as implicit placeholders;
    /// an intermediate that is currently a file, symlink or whiteout is turned
    /// into one. The node at `path` itself is always explicit.
    /// Overwriting a directory with a non-directory drops its subtree.
    pub fn insert(&mut self, path: &str, info: FileInfo) -> Result<&mut FileNode> {
        let segments = split_path(path)?;
        let (name, parents) = segments
            .split_last()
            .ok_or_else(|| Error::MalformedPath {
                path: path.to_string(),
                reason: "path names no entry",
            })?;

        let mut node = &mut self.root;
        for segment in parents {
            let parent_path = node.path().to_string();
            let child = node
                .children_mut()
                .entry((*segment).to_string())
                .or_insert_with(|| FileNode::implicit_dir(&parent_path, segment));
            if !child.is_dir() {
                child.set_info(FileInfo::directory());
                child.set_implicit(true);
            }
            node = child;
        }

        let parent_path = node.path().to_string();
        match node.children_mut().entry((*name).to_string()) {
            Entry::Occupied(occupied) => {
                let existing = occupied.into_mut();
                existing.set_info(info);
                existing.set_implicit(false);
                Ok(existing)
            }
            Entry::Vacant(vacant) => Ok(vacant.insert(FileNode::new_child(&parent_path, name, info))),
        }
    }

    /// Inserts an entry named the way layer archives name them.
    ///
    /// - `dir/.wh.name` becomes a whiteout node at `dir/name`.
    /// - `dir/.wh..wh..opq` marks `dir` opaque; `info` is ignored.
    /// - anything else is a plain [`FileTree::insert`].
    ///
    /// A leading `./` and trailing `/` are tolerated, as archives commonly carry them.
    pub fn insert_layer_entry(&mut self, path: &str, info: FileInfo) -> Result<()> {
        let trimmed = path.strip_prefix("./").unwrap_or(path).trim_end_matches('/');
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some((parent, name)) => (Some(parent), name),
            None => (None, trimmed),
        };

        if name == OPAQUE_MARKER {
            let dir_path = parent.unwrap_or("");
            if !self.get(dir_path).is_some_and(FileNode::is_dir) {
                self.insert(dir_path, FileInfo::directory())?;
            }
            if let Some(dir) = self.get_mut(dir_path) {
                dir.set_opaque(true);
            }
            return Ok(());
        }

        if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
            let target_path = match parent {
                Some(parent) => format!("{}/{}", parent, target),
                None => target.to_string(),
            };
            self.insert(&target_path, FileInfo::whiteout())?;
            return Ok(());
        }

        self.insert(trimmed, info)?;
        Ok(())
    }

    /// Looks up `path`; `""` and `"/"` address the root.
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        if is_root_path(path) {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for segment in split_path(path).ok()? {
            node = node.child(segment)?;
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        if is_root_path(path) {
            return Some(&mut self.root);
        }
        let mut node = &mut self.root;
        for segment in split_path(path).ok()? {
            node = node.children_mut().get_mut(segment)?;
        }
        Some(node)
    }

    /// Detaches and returns the node at `path` together with its subtree.
    pub fn remove(&mut self, path: &str) -> Result<Option<FileNode>> {
        let segments = split_path(path)?;
        let Some((name, parents)) = segments.split_last() else {
            return Ok(None);
        };

        let mut node = &mut self.root;
        for segment in parents {
            match node.children_mut().get_mut(*segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(node.children_mut().remove(*name))
    }

    /// Number of nodes, not counting the root.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let visit = self.visit_depth_parent_first(|_| {
            count += 1;
            Ok::<(), Infallible>(())
        });
        if let Err(never) = visit {
            match never {}
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_leaf()
    }

    /// Sum of all non-whiteout node sizes.
    pub fn total_size(&self) -> u64 {
        self.root.subtree_size()
    }

    /// Walks every node except the root, children before their parent.
    ///
    /// The first error returned by `visitor` stops the walk and is handed back as is.
    pub fn visit_depth_child_first<E, V>(&self, mut visitor: V) -> std::result::Result<(), E>
    where
        V: FnMut(&FileNode) -> std::result::Result<(), E>,
    {
        self.root.visit_child_first(&mut visitor, &accept_all)
    }

    /// Like [`FileTree::visit_depth_child_first`], but only calls `visitor` on
    /// nodes accepted by `evaluator`. Rejected nodes' children are still walked.
    pub fn visit_depth_child_first_filtered<E, V, P>(
        &self,
        mut visitor: V,
        evaluator: P,
    ) -> std::result::Result<(), E>
    where
        V: FnMut(&FileNode) -> std::result::Result<(), E>,
        P: Fn(&FileNode) -> bool,
    {
        self.root.visit_child_first(&mut visitor, &evaluator)
    }

    /// Walks every node except the root, each parent before its children.
    pub fn visit_depth_parent_first<E, V>(&self, mut visitor: V) -> std::result::Result<(), E>
    where
        V: FnMut(&FileNode) -> std::result::Result<(), E>,
    {
        self.root.visit_parent_first(&mut visitor, &accept_all)
    }

    /// Like [`FileTree::visit_depth_parent_first`], but a node rejected by
    /// `evaluator` is skipped together with its entire subtree.
    pub fn visit_depth_parent_first_filtered<E, V, P>(
        &self,
        mut visitor: V,
        evaluator: P,
    ) -> std::result::Result<(), E>
    where
        V: FnMut(&FileNode) -> std::result::Result<(), E>,
        P: Fn(&FileNode) -> bool,
    {
        self.root.visit_parent_first(&mut visitor, &evaluator)
    }

    /// Drops whiteout markers, leaving only entries that exist.
    pub fn resolve_whiteouts(&mut self) {
        self.root.remove_whiteouts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_node::NodeKind;

    fn paths_child_first(tree: &FileTree) -> Vec<String> {
        let mut paths = Vec::new();
        tree.visit_depth_child_first(|node| {
            paths.push(node.path().to_string());
            Ok::<(), anyhow::Error>(())
        })
        .unwrap();
        paths
    }

    #[test]
    fn test_insert_creates_intermediate_directories() {
        let mut tree = FileTree::new();
        tree.insert("/usr/local/bin/tool", FileInfo::regular(30, 1)).unwrap();

        let usr = tree.get("/usr").unwrap();
        assert_eq!(usr.kind(), NodeKind::Directory);
        assert_eq!(tree.get("usr/local/bin/tool").unwrap().size(), 30);
        assert_eq!(tree.get("/usr/local/bin/tool").unwrap().path(), "/usr/local/bin/tool");
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_explicit_insert_clears_implicit_mark() {
        let mut tree = FileTree::new();
        tree.insert("/tmp/keep", FileInfo::regular(1, 1)).unwrap();
        assert!(tree.get("/tmp").unwrap().is_implicit());
        assert!(!tree.get("/tmp/keep").unwrap().is_implicit());

        let mut sticky = FileInfo::directory();
        sticky.mode = 0o1777;
        tree.insert("/tmp", sticky).unwrap();

        let tmp = tree.get("/tmp").unwrap();
        assert!(!tmp.is_implicit());
        assert_eq!(tmp.info().mode, 0o1777);
        assert!(tmp.child("keep").is_some());

        tree.insert("/tmp/keep/deeper", FileInfo::regular(2, 2)).unwrap();
        assert!(tree.get("/tmp/keep").unwrap().is_implicit());
        assert!(!tree.get("/tmp").unwrap().is_implicit());
    }

    #[test]
    fn test_insert_rejects_malformed_paths() {
        let mut tree = FileTree::new();
        for bad in ["", "/", "a//b", "a/", "a/./b", "../etc"] {
            let err = tree.insert(bad, FileInfo::regular(1, 1)).unwrap_err();
            assert!(
                matches!(err, Error::MalformedPath { .. }),
                "expected MalformedPath for {bad:?}"
            );
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_insert_overwrites_existing_node() {
        let mut tree = FileTree::new();
        tree.insert("/opt/app/config", FileInfo::regular(10, 1)).unwrap();
        tree.insert("/opt/app", FileInfo::regular(3, 2)).unwrap();

        let app = tree.get("/opt/app").unwrap();
        assert_eq!(app.kind(), NodeKind::Regular);
        assert!(app.is_leaf());
        assert!(tree.get("/opt/app/config").is_none());
    }

    #[test]
    fn test_visit_orders_are_sorted_and_stable() {
        let mut first = FileTree::new();
        first.insert("/b/y", FileInfo::regular(1, 1)).unwrap();
        first.insert("/a", FileInfo::regular(1, 1)).unwrap();
        first.insert("/b/x", FileInfo::regular(1, 1)).unwrap();

        let mut second = FileTree::new();
        second.insert("/b/x", FileInfo::regular(1, 1)).unwrap();
        second.insert("/a", FileInfo::regular(1, 1)).unwrap();
        second.insert("/b/y", FileInfo::regular(1, 1)).unwrap();

        assert_eq!(paths_child_first(&first), vec!["/a", "/b/x", "/b/y", "/b"]);
        assert_eq!(paths_child_first(&first), paths_child_first(&second));

        let mut parent_first = Vec::new();
        first
            .visit_depth_parent_first(|node| {
                parent_first.push(node.path().to_string());
                Ok::<(), anyhow::Error>(())
            })
            .unwrap();
        assert_eq!(parent_first, vec!["/a", "/b", "/b/x", "/b/y"]);
    }

    #[test]
    fn test_visitor_error_aborts_walk() {
        let mut tree = FileTree::new();
        tree.insert("/a", FileInfo::regular(1, 1)).unwrap();
        tree.insert("/b", FileInfo::regular(1, 1)).unwrap();
        tree.insert("/c", FileInfo::regular(1, 1)).unwrap();

        let mut seen = Vec::new();
        let result = tree.visit_depth_child_first(|node| {
            seen.push(node.path().to_string());
            if node.name() == "b" {
                anyhow::bail!("cannot process {}", node.path());
            }
            Ok(())
        });

        assert_eq!(result.unwrap_err().to_string(), "cannot process /b");
        assert_eq!(seen, vec!["/a", "/b"]);
    }

    #[test]
    fn test_filtered_walks() {
        let mut tree = FileTree::new();
        tree.insert("/etc/hosts", FileInfo::regular(1, 1)).unwrap();
        tree.insert("/var/log/syslog", FileInfo::regular(1, 1)).unwrap();

        let mut leaves = Vec::new();
        tree.visit_depth_child_first_filtered(
            |node| {
                leaves.push(node.path().to_string());
                Ok::<(), anyhow::Error>(())
            },
            FileNode::is_leaf,
        )
        .unwrap();
        assert_eq!(leaves, vec!["/etc/hosts", "/var/log/syslog"]);

        let mut pruned = Vec::new();
        tree.visit_depth_parent_first_filtered(
            |node| {
                pruned.push(node.path().to_string());
                Ok::<(), anyhow::Error>(())
            },
            |node| node.name() != "var",
        )
        .unwrap();
        assert_eq!(pruned, vec!["/etc", "/etc/hosts"]);
    }

    #[test]
    fn test_insert_layer_entry_translates_markers() {
        let mut tree = FileTree::new();
        tree.insert_layer_entry("./etc/", FileInfo::directory()).unwrap();
        tree.insert_layer_entry("etc/.wh.motd", FileInfo::regular(0, 0)).unwrap();
        tree.insert_layer_entry("var/cache/.wh..wh..opq", FileInfo::regular(0, 0)).unwrap();

        assert_eq!(tree.get("/etc/motd").unwrap().kind(), NodeKind::Whiteout);
        assert!(tree.get("/etc/.wh.motd").is_none());

        let cache = tree.get("/var/cache").unwrap();
        assert!(cache.is_dir());
        assert!(cache.is_opaque());
        assert!(cache.is_leaf());
    }

    #[test]
    fn test_remove_and_resolve_whiteouts() {
        let mut tree = FileTree::new();
        tree.insert("/a/b", FileInfo::regular(4, 1)).unwrap();
        tree.insert("/a/gone", FileInfo::whiteout()).unwrap();
        tree.insert("/c", FileInfo::regular(6, 1)).unwrap();
        assert_eq!(tree.total_size(), 10);

        let removed = tree.remove("/c").unwrap().unwrap();
        assert_eq!(removed.size(), 6);
        assert!(tree.remove("/missing/path").unwrap().is_none());

        tree.resolve_whiteouts();
        assert!(tree.get("/a/gone").is_none());
        assert_eq!(tree.len(), 2);
    }
}

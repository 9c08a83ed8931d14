//! A single filesystem entry inside a layer tree.
//!
//! [`FileNode`] owns its children outright (no back-pointers); the node's
//! absolute path is cached as a plain string when the node is created, so it
//! never has to be recomputed by walking up the tree.
//!
//! The payload is the closed [`FileInfo`] record rather than an open metadata
//! map: kind, size, content hash and ownership are all the engine ever looks at.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a node represents on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Regular,
    Directory,
    Symlink,
    /// The path existed in an earlier layer and is deleted by this one.
    Whiteout,
}

/// How a node in a compared tree relates to the reference tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DiffType {
    #[default]
    Unmodified,
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileInfo {
    pub kind: NodeKind,
    /// Size of this entry alone, never cumulative.
    pub size: u64,
    /// Content marker supplied by the layer reader (e.g. a digest of the bytes).
    pub hash: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub link_target: Option<String>,
}

impl FileInfo {
    pub fn regular(size: u64, hash: u64) -> Self {
        Self {
            kind: NodeKind::Regular,
            size,
            hash,
            mode: 0o644,
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            mode: 0o755,
            ..Default::default()
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Symlink,
            mode: 0o777,
            link_target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn whiteout() -> Self {
        Self {
            kind: NodeKind::Whiteout,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// True when `other` describes the same content: kind, size, hash,
    /// permissions, ownership and link target all match.
    pub fn same_content(&self, other: &FileInfo) -> bool {
        self == other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    name: String,
    path: String,
    info: FileInfo,
    /// Directory hides whatever lower layers had beneath it.
    opaque: bool,
    /// Directory created only to hold a deeper entry; the layer never wrote
    /// it, so its info is a placeholder and must not replace lower metadata.
    #[serde(skip)]
    implicit: bool,
    diff_type: DiffType,
    children: BTreeMap<String, FileNode>,
}

impl FileNode {
    pub(crate) fn root() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            info: FileInfo::directory(),
            opaque: false,
            implicit: false,
            diff_type: DiffType::Unmodified,
            children: BTreeMap::new(),
        }
    }

    /// Placeholder directory for a path the layer only implies.
    pub(crate) fn implicit_dir(parent_path: &str, name: &str) -> Self {
        let mut node = Self::new_child(parent_path, name, FileInfo::directory());
        node.implicit = true;
        node
    }

    pub(crate) fn new_child(parent_path: &str, name: &str, info: FileInfo) -> Self {
        Self {
            name: name.to_string(),
            path: format!("{}/{}", parent_path, name),
            info,
            opaque: false,
            implicit: false,
            diff_type: DiffType::Unmodified,
            children: BTreeMap::new(),
        }
    }

    /// Copy of this node with no children and a fresh diff tag.
    pub(crate) fn without_children(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            info: self.info.clone(),
            opaque: self.opaque,
            implicit: self.implicit,
            diff_type: DiffType::Unmodified,
            children: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path, e.g. `/usr/bin/env`. The root's path is empty.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn kind(&self) -> NodeKind {
        self.info.kind
    }

    pub fn diff_type(&self) -> DiffType {
        self.diff_type
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn is_dir(&self) -> bool {
        self.info.is_dir()
    }

    /// True for a directory that exists only because a deeper path was inserted.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub fn is_whiteout(&self) -> bool {
        self.info.kind == NodeKind::Whiteout
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&FileNode> {
        self.children.get(name)
    }

    /// Children in name order.
    pub fn children(&self) -> impl Iterator<Item = &FileNode> {
        self.children.values()
    }

    /// Sum of this node's size and every non-whiteout descendant's size.
    pub fn subtree_size(&self) -> u64 {
        let own = if self.is_whiteout() { 0 } else { self.info.size };
        own + self.children.values().map(FileNode::subtree_size).sum::<u64>()
    }

    pub(crate) fn set_info(&mut self, info: FileInfo) {
        if !info.is_dir() {
            self.children.clear();
            self.opaque = false;
        }
        self.info = info;
    }

    pub(crate) fn set_implicit(&mut self, implicit: bool) {
        self.implicit = implicit;
    }

    pub(crate) fn set_opaque(&mut self, opaque: bool) {
        self.opaque = opaque;
    }

    pub(crate) fn set_diff_type(&mut self, diff_type: DiffType) {
        self.diff_type = diff_type;
    }

    pub(crate) fn children_mut(&mut self) -> &mut BTreeMap<String, FileNode> {
        &mut self.children
    }

    /// Marks this node and its whole subtree with `diff_type`.
    pub(crate) fn assign_diff_type_recursive(&mut self, diff_type: DiffType) {
        self.diff_type = diff_type;
        for child in self.children.values_mut() {
            child.assign_diff_type_recursive(diff_type);
        }
    }

    pub(crate) fn visit_child_first<E, V, P>(&self, visitor: &mut V, evaluator: &P) -> Result<(), E>
    where
        V: FnMut(&FileNode) -> Result<(), E>,
        P: Fn(&FileNode) -> bool,
    {
        for child in self.children.values() {
            child.visit_child_first(visitor, evaluator)?;
            if evaluator(child) {
                visitor(child)?;
            }
        }
        Ok(())
    }

    pub(crate) fn visit_parent_first<E, V, P>(&self, visitor: &mut V, evaluator: &P) -> Result<(), E>
    where
        V: FnMut(&FileNode) -> Result<(), E>,
        P: Fn(&FileNode) -> bool,
    {
        for child in self.children.values() {
            if !evaluator(child) {
                continue;
            }
            visitor(child)?;
            child.visit_parent_first(visitor, evaluator)?;
        }
        Ok(())
    }

    pub(crate) fn remove_whiteouts(&mut self) {
        self.children.retain(|_, child| !child.is_whiteout());
        for child in self.children.values_mut() {
            child.remove_whiteouts();
        }
    }
}

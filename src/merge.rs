//! Layer stacking: overlaying later layer trees on earlier ones.
//!
//! Stacking is last-writer-wins per path, following overlay filesystem rules:
//! - a whiteout in the upper tree replaces the lower entry (and its subtree)
//!   with the whiteout marker;
//! - an upper file or symlink replaces the lower entry and its subtree;
//! - an upper directory merges into a lower directory, unless it is opaque,
//!   in which case it replaces it;
//! - an upper directory over a lower non-directory replaces it and becomes opaque;
//! - an implicit upper directory (one the layer never wrote, only implied by a
//!   deeper entry) keeps the lower directory's metadata.
//!
//! Markers are kept in stacked trees so stacking stays associative: a layer
//! that deletes a path must still delete it when it is first combined with a
//! later layer and only then laid over the earlier ones. [`squash`] resolves
//! the markers once the whole range has been stacked.

use crate::file_node::FileNode;
use crate::file_tree::FileTree;

/// Lays `upper` over `lower` in place. `upper` is never modified.
pub fn stack(lower: &mut FileTree, upper: &FileTree) {
    let upper_root = upper.root();
    if upper_root.is_opaque() {
        *lower.root_mut() = upper_root.clone();
        return;
    }
    merge_children(lower.root_mut(), upper_root);
}

/// Returns a new tree with `upper` laid over `lower`.
pub fn merge(lower: &FileTree, upper: &FileTree) -> FileTree {
    let mut result = lower.clone();
    stack(&mut result, upper);
    result
}

/// Folds [`stack`] over `trees` in order, starting from an empty tree.
/// Whiteout markers are kept.
pub fn stack_all<'a, I>(trees: I) -> FileTree
where
    I: IntoIterator<Item = &'a FileTree>,
{
    let mut result = FileTree::new();
    for tree in trees {
        stack(&mut result, tree);
    }
    result
}

/// The net filesystem produced by applying `trees` in order.
pub fn squash<'a, I>(trees: I) -> FileTree
where
    I: IntoIterator<Item = &'a FileTree>,
{
    let mut result = stack_all(trees);
    result.resolve_whiteouts();
    result
}

fn merge_children(lower: &mut FileNode, upper: &FileNode) {
    for upper_child in upper.children() {
        match lower.children_mut().get_mut(upper_child.name()) {
            Some(lower_child) => merge_node(lower_child, upper_child),
            None => {
                lower
                    .children_mut()
                    .insert(upper_child.name().to_string(), upper_child.clone());
            }
        }
    }
}

fn merge_node(lower: &mut FileNode, upper: &FileNode) {
    if !upper.is_dir() {
        *lower = upper.clone();
        return;
    }

    if !lower.is_dir() {
        *lower = upper.clone();
        lower.set_opaque(true);
        return;
    }

    if upper.is_opaque() {
        *lower = upper.clone();
        return;
    }

    if !upper.is_implicit() {
        lower.set_info(upper.info().clone());
        lower.set_implicit(false);
    }
    merge_children(lower, upper);
}

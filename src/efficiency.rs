//! Wasted-space accounting across the raw layer trees of an image.
//!
//! Every leaf of every layer is an occurrence of its path. A path that occurs
//! in more than one layer is paid for more than once; those paths make up the
//! inefficiency list, largest cumulative size first.
//!
//! A whiteout occurrence costs what it deletes: the size of that path (its
//! whole subtree for a directory) in the squash of all earlier layers.

use crate::file_node::{FileNode, NodeKind};
use crate::file_tree::FileTree;
use crate::merge;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub layer: usize,
    pub size: u64,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InefficiencyRecord {
    pub path: String,
    pub nodes: Vec<Occurrence>,
    pub cumulative_size: u64,
}

impl InefficiencyRecord {
    /// How many layers carry this path.
    pub fn references(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyReport {
    /// `1 - wasted_bytes / total_bytes`, within `[0, 1]`.
    pub score: f64,
    pub wasted_bytes: u64,
    pub total_bytes: u64,
    pub inefficiencies: Vec<InefficiencyRecord>,
}

impl EfficiencyReport {
    /// Single pass over `trees` (oldest first). The trees are the raw per-layer
    /// trees, not squashes.
    pub fn analyze<'a, I>(trees: I) -> Self
    where
        I: IntoIterator<Item = &'a FileTree>,
    {
        let mut records: HashMap<String, InefficiencyRecord> = HashMap::new();
        let mut stacked = FileTree::new();
        let mut total_bytes = 0u64;
        let mut layer_count = 0usize;

        for (layer, tree) in trees.into_iter().enumerate() {
            let visit = tree.visit_depth_child_first_filtered(
                |node| {
                    let size = if node.is_whiteout() {
                        stacked
                            .get(node.path())
                            .filter(|previous| !previous.is_whiteout())
                            .map(FileNode::subtree_size)
                            .unwrap_or(0)
                    } else {
                        node.size()
                    };
                    total_bytes += size;

                    let record = records
                        .entry(node.path().to_string())
                        .or_insert_with(|| InefficiencyRecord {
                            path: node.path().to_string(),
                            nodes: Vec::new(),
                            cumulative_size: 0,
                        });
                    record.cumulative_size += size;
                    record.nodes.push(Occurrence {
                        layer,
                        size,
                        kind: node.kind(),
                    });
                    Ok::<(), Infallible>(())
                },
                FileNode::is_leaf,
            );
            if let Err(never) = visit {
                match never {}
            }

            merge::stack(&mut stacked, tree);
            layer_count += 1;
        }

        let mut inefficiencies: Vec<InefficiencyRecord> = records
            .into_values()
            .filter(|record| record.references() > 1)
            .collect();
        inefficiencies.sort_by(|a, b| {
            b.cumulative_size
                .cmp(&a.cumulative_size)
                .then_with(|| a.path.cmp(&b.path))
        });

        let wasted_bytes: u64 = inefficiencies.iter().map(|r| r.cumulative_size).sum();
        let score = if total_bytes == 0 {
            1.0
        } else {
            (1.0 - wasted_bytes as f64 / total_bytes as f64).clamp(0.0, 1.0)
        };

        log::debug!(
            "Efficiency over {} layers: score {:.4}, {} wasted of {} bytes, {} inefficient paths",
            layer_count,
            score,
            wasted_bytes,
            total_bytes,
            inefficiencies.len()
        );

        Self {
            score,
            wasted_bytes,
            total_bytes,
            inefficiencies,
        }
    }
}

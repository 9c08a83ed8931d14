use crate::file_tree::FileTree;
use std::sync::Arc;

/// One image layer as handed over by the image reader, oldest first.
///
/// The tree is shared read-only: comparers and analyses hold clones of the
/// `Arc`, never copies of the tree.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub index: usize,
    pub id: String,
    pub digest: String,
    /// Size declared by the image manifest, in bytes.
    pub size: u64,
    pub command: String,
    pub tree: Arc<FileTree>,
}

impl LayerRecord {
    pub fn new(
        index: usize,
        id: impl Into<String>,
        digest: impl Into<String>,
        size: u64,
        created_by: &str,
        tree: FileTree,
    ) -> Self {
        Self {
            index,
            id: id.into(),
            digest: digest.into(),
            size,
            command: normalize_command(created_by),
            tree: Arc::new(tree),
        }
    }

    /// The id truncated to 15 characters, as layer listings usually show it.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(15) {
            Some((end, _)) => &self.id[..end],
            None => &self.id,
        }
    }
}

/// Strips the shell prefix build tools put in front of history commands.
fn normalize_command(created_by: &str) -> String {
    if created_by.contains("/bin/sh -c #(nop) ") {
        created_by
            .replace("/bin/sh -c #(nop) ", "")
            .trim_start()
            .to_string()
    } else if created_by.contains("/bin/sh -c ") {
        created_by
            .replace("/bin/sh -c ", "")
            .trim_start()
            .to_string()
    } else {
        created_by.to_string()
    }
}

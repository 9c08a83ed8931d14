pub mod analysis;
pub mod comparer;
pub mod diff;
pub mod efficiency;
pub mod error;
pub mod file_node;
pub mod file_tree;
pub mod layer;
pub mod merge;

// Re-exports for easy access
pub use analysis::Analysis;
pub use comparer::{Comparer, RangeKey};
pub use efficiency::{EfficiencyReport, InefficiencyRecord, Occurrence};
pub use error::{Error, Result};
pub use file_node::{DiffType, FileInfo, FileNode, NodeKind};
pub use file_tree::FileTree;
pub use layer::LayerRecord;

//! Error types for the layer tree engine.
//!
//! Every fallible engine operation returns [`Result<T>`]. Visitor errors are not
//! part of this enum: a walk hands back whatever error the visitor produced.

use crate::comparer::RangeKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key references a layer outside `[0, layer_count)` or describes a
    /// range that is neither empty (`stop == start - 1`) nor ascending.
    #[error("invalid layer range {key} for an image with {layer_count} layers")]
    InvalidRange { key: RangeKey, layer_count: usize },

    /// A path handed to the tree had an empty, `.` or `..` segment.
    #[error("malformed path {path:?}: {reason}")]
    MalformedPath { path: String, reason: &'static str },
}

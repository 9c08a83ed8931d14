//! Range-keyed cache of squashed and diffed layer trees.
//!
//! [`Comparer`] holds the ordered per-layer trees of one image and answers
//! [`RangeKey`] requests: stack the bottom range into a base, lay the top range
//! over it, and diff the result against the base. Each distinct key is computed
//! at most once for the lifetime of the comparer, including when several threads
//! ask for the same key at the same moment.
//!
//! Locking: the key → slot map sits behind a `parking_lot::RwLock`. A slot is an
//! `Arc<OnceLock<..>>`, so the map lock is only held long enough to find or create
//! the slot; the computation itself runs inside `OnceLock::get_or_init`, which
//! makes later requesters for the same key wait for the first one's result.

use crate::diff;
use crate::error::{Error, Result};
use crate::file_tree::FileTree;
use crate::layer::LayerRecord;
use crate::merge;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Two inclusive layer ranges: `bottom_start..=bottom_stop` forms the base,
/// `top_start..=top_stop` is laid over it.
///
/// A range is empty when `stop == start - 1`; an empty bottom range is the
/// "nothing below" base used for the first layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeKey {
    pub bottom_start: isize,
    pub bottom_stop: isize,
    pub top_start: isize,
    pub top_stop: isize,
}

impl RangeKey {
    pub fn new(bottom_start: isize, bottom_stop: isize, top_start: isize, top_stop: isize) -> Self {
        Self {
            bottom_start,
            bottom_stop,
            top_start,
            top_stop,
        }
    }

    /// Layer `index` compared against everything below it.
    ///
    /// Indices beyond `isize::MAX` saturate, so the key is still built and is
    /// rejected by [`Comparer::get_tree`] as out of range.
    pub fn natural(index: usize) -> Self {
        let index = saturating_index(index);
        Self::new(0, index - 1, index, index)
    }

    /// Layers `1..=index` compared against the base layer. For the base layer
    /// itself this is the same as [`RangeKey::natural`].
    pub fn aggregated(index: usize) -> Self {
        if index == 0 {
            return Self::natural(0);
        }
        Self::new(0, 0, 1, saturating_index(index))
    }
}

fn saturating_index(index: usize) -> isize {
    isize::try_from(index).unwrap_or(isize::MAX)
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..={}] vs [{}..={}]",
            self.bottom_start, self.bottom_stop, self.top_start, self.top_stop
        )
    }
}

/// Resolves an inclusive `start..=stop` pair to slice indices, or `None` when
/// it is out of bounds or malformed.
///
/// `start` must name an existing layer even for an empty range. The one
/// exception is `0..=-1`, the empty base, which is valid for any image
/// including one with no layers.
fn layer_range(start: isize, stop: isize, layer_count: usize) -> Option<Range<usize>> {
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(stop.checked_add(1)?).ok()?;
    if end < start || end > layer_count {
        return None;
    }
    if start >= layer_count && !(start == 0 && end == 0) {
        return None;
    }
    Some(start..end)
}

type Slot = Arc<OnceLock<Arc<FileTree>>>;

pub struct Comparer {
    layers: Vec<Arc<FileTree>>,
    cache: RwLock<HashMap<RangeKey, Slot>>,
    computations: AtomicUsize,
}

impl Comparer {
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Arc<FileTree>>,
    {
        Self {
            layers: layers.into_iter().collect(),
            cache: RwLock::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    /// Shares the layer trees of `records` without copying them.
    pub fn from_layers(records: &[LayerRecord]) -> Self {
        Self::new(records.iter().map(|record| Arc::clone(&record.tree)))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Returns the diffed tree for `key`, computing it on first request.
    ///
    /// # Errors
    /// [`Error::InvalidRange`] when either range falls outside the image or
    /// is neither empty nor ascending. The cache is left untouched.
    pub fn get_tree(&self, key: RangeKey) -> Result<Arc<FileTree>> {
        let (bottom, top) = self.validate(key)?;
        let slot = self.slot(key);

        if let Some(tree) = slot.get() {
            log::trace!("Cache hit for {}", key);
            return Ok(Arc::clone(tree));
        }

        let tree = slot.get_or_init(|| Arc::new(self.compute(key, bottom, top)));
        Ok(Arc::clone(tree))
    }

    /// Per-layer keys: each layer against the squash of all layers below it.
    pub fn natural_keys(&self) -> Vec<RangeKey> {
        (0..self.layers.len()).map(RangeKey::natural).collect()
    }

    /// Per-layer keys: everything since the base layer against the base layer.
    pub fn aggregated_keys(&self) -> Vec<RangeKey> {
        (0..self.layers.len()).map(RangeKey::aggregated).collect()
    }

    /// Computes every natural and aggregated key up front.
    pub fn build_cache(&self) -> Result<()> {
        let keys = self.natural_keys().into_iter().chain(self.aggregated_keys());
        for key in keys {
            self.get_tree(key)?;
        }
        log::debug!(
            "Comparison cache ready: {} layers, {} trees computed",
            self.layers.len(),
            self.computations()
        );
        Ok(())
    }

    /// Number of trees actually computed so far (cache misses).
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Number of keys whose tree is available without computation.
    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    fn validate(&self, key: RangeKey) -> Result<(Range<usize>, Range<usize>)> {
        let count = self.layers.len();
        let invalid = || Error::InvalidRange {
            key,
            layer_count: count,
        };
        let bottom = layer_range(key.bottom_start, key.bottom_stop, count).ok_or_else(invalid)?;
        let top = layer_range(key.top_start, key.top_stop, count).ok_or_else(invalid)?;
        Ok((bottom, top))
    }

    fn slot(&self, key: RangeKey) -> Slot {
        {
            let cache = self.cache.read();
            if let Some(slot) = cache.get(&key) {
                return Arc::clone(slot);
            }
        }

        // Another thread may have inserted the slot between the two locks.
        let mut cache = self.cache.write();
        Arc::clone(cache.entry(key).or_default())
    }

    fn compute(&self, key: RangeKey, bottom: Range<usize>, top: Range<usize>) -> FileTree {
        self.computations.fetch_add(1, Ordering::SeqCst);
        log::debug!("Building comparison tree for {}", key);

        let base = merge::stack_all(self.layers[bottom].iter().map(|tree| tree.as_ref()));
        let mut compare = base.clone();
        for tree in &self.layers[top] {
            merge::stack(&mut compare, tree);
        }
        diff::diff(&base, &compare)
    }
}

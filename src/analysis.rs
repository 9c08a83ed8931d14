//! Image-level entry point tying the layer engine together.
//!
//! [`Analysis`] takes the ordered [`LayerRecord`]s produced by an image reader and:
//! - builds a [`Comparer`] over the shared layer trees and pre-computes the
//!   natural and aggregated per-layer views;
//! - runs the [`EfficiencyReport`] pass on a second thread at the same time;
//! - derives image totals (declared size, size added on top of the base layer,
//!   wasted bytes and the wasted share of the added size).
//!
//! Presentation and export layers read everything they need from here.

use crate::comparer::{Comparer, RangeKey};
use crate::efficiency::{EfficiencyReport, InefficiencyRecord};
use crate::file_tree::FileTree;
use crate::layer::LayerRecord;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;

pub struct Analysis {
    layers: Vec<LayerRecord>,
    comparer: Comparer,
    efficiency: EfficiencyReport,
}

impl Analysis {
    /// Analyzes `layers`, which must be ordered oldest first with `index`
    /// matching their position.
    ///
    /// # Errors
    /// - a layer whose `index` does not match its position;
    /// - a failure while populating the comparison cache.
    pub fn new(layers: Vec<LayerRecord>) -> Result<Self> {
        for (position, layer) in layers.iter().enumerate() {
            if layer.index != position {
                bail!(
                    "Layer {} ({}) is out of order: expected index {}",
                    layer.index,
                    layer.id,
                    position
                );
            }
        }

        let comparer = Comparer::from_layers(&layers);
        let efficiency = std::thread::scope(|scope| -> Result<EfficiencyReport> {
            let report =
                scope.spawn(|| EfficiencyReport::analyze(layers.iter().map(|l| l.tree.as_ref())));
            comparer
                .build_cache()
                .context("Failed to populate the layer comparison cache")?;
            report
                .join()
                .map_err(|_| anyhow!("Efficiency analysis thread panicked"))
        })?;

        log::info!(
            "Analyzed {} layers: efficiency {:.2}%, {} bytes wasted",
            layers.len(),
            efficiency.score * 100.0,
            efficiency.wasted_bytes
        );

        Ok(Self {
            layers,
            comparer,
            efficiency,
        })
    }

    pub fn layers(&self) -> &[LayerRecord] {
        &self.layers
    }

    pub fn comparer(&self) -> &Comparer {
        &self.comparer
    }

    pub fn efficiency_report(&self) -> &EfficiencyReport {
        &self.efficiency
    }

    pub fn efficiency(&self) -> f64 {
        self.efficiency.score
    }

    pub fn inefficiencies(&self) -> &[InefficiencyRecord] {
        &self.efficiency.inefficiencies
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.efficiency.wasted_bytes
    }

    /// Sum of the declared layer sizes.
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size).sum()
    }

    /// Declared size of every layer above the base layer.
    pub fn user_size_bytes(&self) -> u64 {
        self.layers.iter().skip(1).map(|l| l.size).sum()
    }

    /// Wasted bytes as a fraction of [`Analysis::user_size_bytes`]; 0 when
    /// nothing was added on top of the base layer.
    pub fn wasted_user_percent(&self) -> f64 {
        match self.user_size_bytes() {
            0 => 0.0,
            user => self.wasted_bytes() as f64 / user as f64,
        }
    }

    /// The standard per-layer view: layer `index` diffed against everything below it.
    pub fn layer_tree(&self, index: usize) -> Result<Arc<FileTree>> {
        self.comparer
            .get_tree(RangeKey::natural(index))
            .with_context(|| format!("Failed to build the tree for layer {}", index))
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// A single featurized crystal structure ready to be batched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystalItem {
    /// Structure identifier (carried through to the prediction export)
    pub id: String,
    /// Raw target value; class label 0/1 for classification
    pub target: f32,
    /// Per-atom feature rows, `[n_atoms][atom_width]`
    pub atom_features: Vec<Vec<f32>>,
    /// Per-bond feature rows, `[n_atoms][max_neighbors][neighbor_width]`
    pub neighbor_features: Vec<Vec<Vec<f32>>>,
    /// Neighbor atom index per bond, local to this structure
    pub neighbor_indices: Vec<Vec<usize>>,
}

impl CrystalItem {
    pub fn num_atoms(&self) -> usize {
        self.atom_features.len()
    }

    pub fn atom_width(&self) -> usize {
        self.atom_features.first().map_or(0, Vec::len)
    }

    pub fn max_neighbors(&self) -> usize {
        self.neighbor_indices.first().map_or(0, Vec::len)
    }

    pub fn neighbor_width(&self) -> usize {
        self.neighbor_features
            .first()
            .and_then(|bonds| bonds.first())
            .map_or(0, Vec::len)
    }

    /// Checks that every row agrees on its widths and that neighbor
    /// indices stay inside the structure.
    pub fn check_shape(&self) -> std::result::Result<(), String> {
        let n = self.num_atoms();
        if n == 0 {
            return Err(format!("structure '{}' has no atoms", self.id));
        }
        let (fa, m, fb) = (self.atom_width(), self.max_neighbors(), self.neighbor_width());
        if fa == 0 || m == 0 || fb == 0 {
            return Err(format!(
                "structure '{}' has an empty feature axis (atom {fa}, neighbors {m}, bond {fb})",
                self.id
            ));
        }
        if self.neighbor_features.len() != n || self.neighbor_indices.len() != n {
            return Err(format!(
                "structure '{}' has {n} atoms but {} neighbor feature rows and {} index rows",
                self.id,
                self.neighbor_features.len(),
                self.neighbor_indices.len()
            ));
        }
        if self.atom_features.iter().any(|row| row.len() != fa) {
            return Err(format!("structure '{}' has ragged atom features", self.id));
        }
        for (bonds, idx) in self.neighbor_features.iter().zip(&self.neighbor_indices) {
            if bonds.len() != m || idx.len() != m || bonds.iter().any(|b| b.len() != fb) {
                return Err(format!("structure '{}' has ragged neighbor lists", self.id));
            }
            if let Some(bad) = idx.iter().find(|&&j| j >= n) {
                return Err(format!(
                    "structure '{}' references neighbor {bad} but has {n} atoms",
                    self.id
                ));
            }
        }
        if !self.target.is_finite() {
            return Err(format!("structure '{}' has a non-finite target", self.id));
        }
        Ok(())
    }
}

/// In-memory dataset of featurized crystals
#[derive(Debug, Clone)]
pub struct CrystalDataset {
    items: Vec<CrystalItem>,
}

impl CrystalDataset {
    /// Builds a dataset after checking every item and that all items share
    /// feature widths and neighbor count (the batcher relies on both).
    pub fn from_items(items: Vec<CrystalItem>) -> Result<Self> {
        let first = items
            .first()
            .ok_or_else(|| HarnessError::InvalidDataset("dataset is empty".to_string()))?;
        let widths = (first.atom_width(), first.max_neighbors(), first.neighbor_width());
        for item in &items {
            item.check_shape().map_err(HarnessError::InvalidDataset)?;
            let other = (item.atom_width(), item.max_neighbors(), item.neighbor_width());
            if other != widths {
                return Err(HarnessError::InvalidDataset(format!(
                    "structure '{}' has widths {other:?}, expected {widths:?}",
                    item.id
                )));
            }
        }
        Ok(Self { items })
    }

    /// Loads pre-featurized structures, one JSON object per line.
    /// Blank lines are skipped.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| HarnessError::io(path, e))?;
        let mut items = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| HarnessError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let item: CrystalItem =
                serde_json::from_str(&line).map_err(|e| HarnessError::Dataset {
                    path: path.to_path_buf(),
                    line: i + 1,
                    msg: e.to_string(),
                })?;
            item.check_shape().map_err(|msg| HarnessError::Dataset {
                path: path.to_path_buf(),
                line: i + 1,
                msg,
            })?;
            items.push(item);
        }
        Self::from_items(items)
    }

    pub fn items(&self) -> &[CrystalItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Dataset<CrystalItem> for CrystalDataset {
    fn get(&self, index: usize) -> Option<CrystalItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Index view over a shared dataset, used for one fold's train or
/// validation side.
pub struct FoldSubset<D> {
    inner: Arc<D>,
    indices: Vec<usize>,
}

impl<D> FoldSubset<D> {
    pub fn new(inner: Arc<D>, indices: Vec<usize>) -> Self {
        Self { inner, indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: Dataset<CrystalItem>> Dataset<CrystalItem> for FoldSubset<D> {
    fn get(&self, index: usize) -> Option<CrystalItem> {
        self.indices.get(index).and_then(|&i| self.inner.get(i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Fails unless every target is a binary class label.
pub fn check_binary_labels<D: Dataset<CrystalItem>>(dataset: &D) -> Result<()> {
    for i in 0..dataset.len() {
        let Some(item) = dataset.get(i) else { continue };
        if item.target != 0.0 && item.target != 1.0 {
            return Err(HarnessError::Config(format!(
                "classification needs 0/1 labels, structure '{}' has target {}",
                item.id, item.target
            )));
        }
    }
    Ok(())
}

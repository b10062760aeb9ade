//! K-fold partitioning of dataset indices

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// One train/validation partition; `fold` is 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    pub fold: usize,
    pub train_indices: Vec<usize>,
    pub val_indices: Vec<usize>,
}

/// K-fold splitter with an optional seeded shuffle
#[derive(Debug, Clone)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl KFold {
    /// Shuffled K-fold with seed 42
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: true,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Contiguous folds in index order
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Partitions `0..n_samples` into validation sets of near-equal size;
    /// the first `n_samples % n_splits` folds hold one extra index.
    pub fn split(&self, n_samples: usize) -> Result<Vec<FoldSplit>> {
        if self.n_splits < 2 {
            return Err(HarnessError::invalid("folds", self.n_splits, "need at least 2 folds"));
        }
        if n_samples < self.n_splits {
            return Err(HarnessError::invalid(
                "folds",
                self.n_splits,
                &format!("cannot exceed the number of samples ({n_samples})"),
            ));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            indices.shuffle(&mut rng);
        }

        let base = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;

        let mut splits = Vec::with_capacity(self.n_splits);
        let mut current = 0;
        for k in 0..self.n_splits {
            let size = if k < remainder { base + 1 } else { base };
            let val_indices = indices[current..current + size].to_vec();
            let train_indices = indices[..current]
                .iter()
                .chain(&indices[current + size..])
                .copied()
                .collect();
            splits.push(FoldSplit {
                fold: k + 1,
                train_indices,
                val_indices,
            });
            current += size;
        }

        Ok(splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_partition(splits: &[FoldSplit], n: usize) {
        let mut all_val: Vec<usize> = splits.iter().flat_map(|s| s.val_indices.clone()).collect();
        all_val.sort_unstable();
        assert_eq!(all_val, (0..n).collect::<Vec<_>>());

        for split in splits {
            let train: HashSet<_> = split.train_indices.iter().collect();
            assert!(split.val_indices.iter().all(|i| !train.contains(i)));
            assert_eq!(split.train_indices.len() + split.val_indices.len(), n);
        }
    }

    #[test]
    fn every_index_validated_exactly_once() {
        for (n, k) in [(20, 5), (101, 50), (7, 7), (53, 4)] {
            let splits = KFold::new(k).split(n).unwrap();
            assert_eq!(splits.len(), k);
            assert_partition(&splits, n);
        }
    }

    #[test]
    fn fold_sizes_differ_by_at_most_one() {
        let splits = KFold::new(4).split(10).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|s| s.val_indices.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
        assert_eq!(splits[0].fold, 1);
        assert_eq!(splits[3].fold, 4);
    }

    #[test]
    fn same_seed_same_folds() {
        let a = KFold::new(5).with_seed(7).split(40).unwrap();
        let b = KFold::new(5).with_seed(7).split(40).unwrap();
        let c = KFold::new(5).with_seed(8).split(40).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unshuffled_folds_are_contiguous() {
        let splits = KFold::new(2).without_shuffle().split(4).unwrap();
        assert_eq!(splits[0].val_indices, vec![0, 1]);
        assert_eq!(splits[1].train_indices, vec![0, 1]);
    }

    #[test]
    fn rejects_more_folds_than_samples() {
        assert!(KFold::new(50).split(20).is_err());
        assert!(KFold::new(1).split(20).is_err());
    }
}

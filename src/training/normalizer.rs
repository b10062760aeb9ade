use burn::data::dataset::Dataset;
use burn::tensor::{backend::Backend, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::CrystalItem;
use crate::error::{HarnessError, Result};

/// Scales below this are treated as zero spread.
pub const MIN_STD: f64 = 1e-8;

/// Mean/standard-deviation transform for targets.
///
/// Fitted once per fold and then used unchanged for training, validation
/// and the test pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    mean: f64,
    std: f64,
}

impl Normalizer {
    /// Fits on a sample using the unbiased standard deviation.
    pub fn fit(sample: &[f32]) -> Result<Self> {
        if sample.len() < 2 {
            return Err(HarnessError::InvalidDataset(format!(
                "normalizer needs at least 2 targets, got {}",
                sample.len()
            )));
        }
        let n = sample.len() as f64;
        let mean = sample.iter().map(|&x| x as f64).sum::<f64>() / n;
        let var = sample
            .iter()
            .map(|&x| (x as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        Self::from_parts(mean, var.sqrt())
    }

    pub fn from_parts(mean: f64, std: f64) -> Result<Self> {
        if !mean.is_finite() || !std.is_finite() || std < MIN_STD {
            return Err(HarnessError::DegenerateNormalizer { std });
        }
        Ok(Self { mean, std })
    }

    /// Leaves values untouched; used where targets are class labels.
    pub fn identity() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn normalize<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.sub_scalar(self.mean).div_scalar(self.std)
    }

    pub fn denormalize<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.mul_scalar(self.std).add_scalar(self.mean)
    }

    pub fn normalize_value(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }

    pub fn denormalize_value(&self, y: f64) -> f64 {
        y * self.std + self.mean
    }
}

/// Draws up to `sample_size` targets without replacement from the whole
/// dataset. Smaller datasets are used in full, with a warning.
pub fn sample_targets<D, R>(dataset: &D, sample_size: usize, rng: &mut R) -> Vec<f32>
where
    D: Dataset<CrystalItem> + ?Sized,
    R: Rng + ?Sized,
{
    let n = dataset.len();
    let indices: Vec<usize> = if n < sample_size {
        warn!(
            n,
            sample_size, "dataset has fewer points than the normalizer sample; lower accuracy is expected"
        );
        (0..n).collect()
    } else {
        rand::seq::index::sample(rng, n, sample_size).into_vec()
    };
    indices
        .into_iter()
        .filter_map(|i| dataset.get(i).map(|item| item.target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::chain_item;
    use crate::data::CrystalDataset;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    type B = NdArray<f32>;

    #[test]
    fn fit_matches_sample_moments() {
        let norm = Normalizer::fit(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((norm.mean() - 2.5).abs() < 1e-12);
        // unbiased: sqrt(5/3)
        assert!((norm.std() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn value_round_trip() {
        let norm = Normalizer::fit(&[-3.0, 0.5, 7.25, 11.0, 2.0]).unwrap();
        for x in [-100.0, -1.5, 0.0, 3.3, 1e4] {
            let back = norm.denormalize_value(norm.normalize_value(x));
            assert!((back - x).abs() < 1e-9 * x.abs().max(1.0));
        }
    }

    #[test]
    fn tensor_round_trip() {
        let device = Default::default();
        let norm = Normalizer::fit(&[0.1, 0.4, 0.9, 1.6]).unwrap();
        let values = [[-2.0f32], [0.0], [0.5], [12.0]];
        let t = Tensor::<B, 2>::from_floats(values, &device);
        let back = norm
            .denormalize(norm.normalize(t))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for (b, v) in back.iter().zip(values.iter()) {
            assert!((b - v[0]).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_spread_is_an_error() {
        let err = Normalizer::fit(&[2.0, 2.0, 2.0]).unwrap_err();
        assert!(matches!(err, HarnessError::DegenerateNormalizer { .. }));
        assert!(Normalizer::fit(&[1.0]).is_err());
    }

    #[test]
    fn small_dataset_is_sampled_in_full() {
        let ds = CrystalDataset::from_items(
            (0..5).map(|i| chain_item(&format!("s{i}"), 2, i as f32)).collect(),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut sample = sample_targets(&ds, 500, &mut rng);
        sample.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sample, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn large_dataset_sample_is_bounded_and_distinct() {
        let ds = CrystalDataset::from_items(
            (0..40).map(|i| chain_item(&format!("s{i}"), 2, i as f32)).collect(),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut sample = sample_targets(&ds, 10, &mut rng);
        assert_eq!(sample.len(), 10);
        sample.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sample.dedup();
        assert_eq!(sample.len(), 10);
    }
}

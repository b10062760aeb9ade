use burn::{
    nn::loss::{MseLoss, Reduction},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::training::metrics::{binary_scores, mae, ClassificationScores};
use crate::training::normalizer::Normalizer;

/// What the model predicts; selected once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    #[default]
    Regression,
    /// Binary classification; the model returns log-probabilities
    Classification,
}

/// Metrics for one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricSet {
    Regression { mae: f64 },
    Classification(ClassificationScores),
}

impl Task {
    /// Name of the metric that selects the best checkpoint
    pub fn metric_name(self) -> &'static str {
        match self {
            Task::Regression => "MAE",
            Task::Classification => "AUC",
        }
    }

    /// Model output columns
    pub fn output_width(self) -> usize {
        match self {
            Task::Regression => 1,
            Task::Classification => 2,
        }
    }

    /// Starting point for best-so-far tracking; any finite metric beats it
    pub fn worst_metric(self) -> f64 {
        match self {
            Task::Regression => f64::INFINITY,
            Task::Classification => f64::NEG_INFINITY,
        }
    }

    /// Strict improvement: lower error for regression, higher AUC otherwise
    pub fn is_better(self, candidate: f64, best: f64) -> bool {
        match self {
            Task::Regression => candidate < best,
            Task::Classification => candidate > best,
        }
    }

    /// Mean squared error against normalized targets, or negative
    /// log-likelihood against label indices.
    pub fn loss<B: Backend>(
        self,
        output: Tensor<B, 2>,
        targets: Tensor<B, 2>,
        normalizer: &Normalizer,
    ) -> Tensor<B, 1> {
        match self {
            Task::Regression => {
                MseLoss::new().forward(output, normalizer.normalize(targets), Reduction::Mean)
            }
            Task::Classification => {
                let labels = targets.int();
                output.gather(1, labels).mean().neg()
            }
        }
    }

    /// Rejects model outputs the task cannot interpret.
    pub fn check_output_width(self, width: usize) -> Result<()> {
        match self {
            Task::Regression if width != 1 => Err(HarnessError::RegressionWidth(width)),
            Task::Classification if width != 2 => Err(HarnessError::UnsupportedClassCount(width)),
            _ => Ok(()),
        }
    }

    /// Host-side metrics from raw model outputs (row-major, `width`
    /// columns) and raw targets.
    pub fn compute_metrics(
        self,
        outputs: &[f32],
        width: usize,
        targets: &[f32],
        normalizer: &Normalizer,
    ) -> Result<MetricSet> {
        self.check_output_width(width)?;
        match self {
            Task::Regression => {
                let predictions: Vec<f64> = outputs
                    .iter()
                    .map(|&y| normalizer.denormalize_value(y as f64))
                    .collect();
                let targets: Vec<f64> = targets.iter().map(|&t| t as f64).collect();
                Ok(MetricSet::Regression {
                    mae: mae(&predictions, &targets),
                })
            }
            Task::Classification => {
                let positive: Vec<f64> = outputs
                    .chunks(2)
                    .map(|row| (row[1] as f64).exp())
                    .collect();
                let predicted: Vec<usize> = outputs
                    .chunks(2)
                    .map(|row| usize::from(row[1] > row[0]))
                    .collect();
                let labels: Vec<usize> = targets.iter().map(|&t| t as usize).collect();
                Ok(MetricSet::Classification(binary_scores(
                    &positive, &predicted, &labels,
                )))
            }
        }
    }

    /// Reported value per example in test mode: the denormalized
    /// prediction, or the positive-class probability.
    pub fn prediction_values(self, outputs: &[f32], width: usize, normalizer: &Normalizer) -> Result<Vec<f64>> {
        self.check_output_width(width)?;
        Ok(match self {
            Task::Regression => outputs
                .iter()
                .map(|&y| normalizer.denormalize_value(y as f64))
                .collect(),
            Task::Classification => outputs.chunks(2).map(|row| (row[1] as f64).exp()).collect(),
        })
    }
}

/// Best-so-far validation metric for one fold
#[derive(Debug, Clone, Copy)]
pub struct BestTracker {
    task: Task,
    best: f64,
    best_epoch: Option<usize>,
}

impl BestTracker {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            best: task.worst_metric(),
            best_epoch: None,
        }
    }

    /// Records an epoch's metric; true when it strictly improves the best.
    pub fn observe(&mut self, epoch: usize, metric: f64) -> bool {
        if self.task.is_better(metric, self.best) {
            self.best = metric;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn stored_bests(task: Task, metrics: &[f64]) -> Vec<f64> {
        let mut tracker = BestTracker::new(task);
        metrics
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| {
                tracker.observe(i + 1, m);
                tracker.best()
            })
            .collect()
    }

    #[test]
    fn regression_best_never_increases() {
        let bests = stored_bests(Task::Regression, &[0.9, 1.2, 0.5, 0.5, 0.7, 0.1, 0.3]);
        assert_eq!(bests.len(), 7);
        assert!(bests.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(*bests.last().unwrap(), 0.1);
    }

    #[test]
    fn classification_best_never_decreases() {
        let bests = stored_bests(Task::Classification, &[0.0, 0.6, 0.55, 0.8, 0.8, 0.7]);
        assert!(bests.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*bests.last().unwrap(), 0.8);
    }

    #[test]
    fn ties_do_not_replace_best() {
        let mut tracker = BestTracker::new(Task::Regression);
        assert!(tracker.observe(1, 0.5));
        assert!(!tracker.observe(2, 0.5));
        assert_eq!(tracker.best_epoch(), Some(1));
    }

    #[test]
    fn first_epoch_is_always_best() {
        // an AUC of zero still sets the first best checkpoint
        let mut tracker = BestTracker::new(Task::Classification);
        assert!(tracker.observe(1, 0.0));
        assert_eq!(tracker.best(), Some(0.0));
    }

    #[test]
    fn more_than_two_classes_is_rejected() {
        let err = Task::Classification
            .compute_metrics(&[0.1, 0.2, 0.7], 3, &[1.0], &Normalizer::identity())
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnsupportedClassCount(3)));
    }

    #[test]
    fn regression_needs_a_single_output_column() {
        // two crystals, two columns each: the second crystal really predicts 1.0
        let outputs = [0.0, 5.0, 1.0, 7.0];
        let norm = Normalizer::identity();
        let err = Task::Regression
            .compute_metrics(&outputs, 2, &[0.0, 5.0], &norm)
            .unwrap_err();
        assert!(matches!(err, HarnessError::RegressionWidth(2)));
        assert!(matches!(
            Task::Regression.prediction_values(&outputs, 2, &norm),
            Err(HarnessError::RegressionWidth(2))
        ));
        assert_eq!(
            Task::Regression.prediction_values(&[0.5, 1.5], 1, &norm).unwrap(),
            vec![0.5, 1.5]
        );
    }

    #[test]
    fn regression_metrics_use_denormalized_outputs() {
        let norm = Normalizer::from_parts(10.0, 2.0).unwrap();
        // outputs 0 and 1 map to 10 and 12
        let metrics = Task::Regression
            .compute_metrics(&[0.0, 1.0], 1, &[11.0, 12.0], &norm)
            .unwrap();
        assert_eq!(metrics, MetricSet::Regression { mae: 0.5 });
    }

    #[test]
    fn nll_loss_picks_label_column() {
        let device = Default::default();
        let log_probs = Tensor::<B, 2>::from_floats(
            [[0.25f32.ln(), 0.75f32.ln()], [0.5f32.ln(), 0.5f32.ln()]],
            &device,
        );
        let labels = Tensor::<B, 2>::from_floats([[1.0], [0.0]], &device);
        let loss: f32 = Task::Classification
            .loss(log_probs, labels, &Normalizer::identity())
            .into_scalar();
        let expected = -(0.75f32.ln() + 0.5f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn mse_loss_uses_normalized_targets() {
        let device = Default::default();
        let norm = Normalizer::from_parts(10.0, 2.0).unwrap();
        let output = Tensor::<B, 2>::from_floats([[0.0], [1.0]], &device);
        let targets = Tensor::<B, 2>::from_floats([[10.0], [12.0]], &device);
        let loss: f32 = Task::Regression.loss(output, targets, &norm).into_scalar();
        assert!(loss.abs() < 1e-6);
    }
}

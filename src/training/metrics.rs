use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::training::results::write_csv;
use crate::training::task::Task;

/// Mean absolute error
pub fn mae(predictions: &[f64], targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (t - p).abs())
        .sum::<f64>()
        / targets.len() as f64
}

/// Coefficient of determination. Constant targets score 1.0 when matched
/// exactly and 0.0 otherwise.
pub fn r2_score(targets: &[f64], predictions: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let mean = targets.iter().sum::<f64>() / targets.len() as f64;
    let ss_res: f64 = targets
        .iter()
        .zip(predictions)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = targets.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Binary classification scores for one batch, positive label 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// `None` when the batch holds a single class
    pub auc: Option<f64>,
}

/// Scores from positive-class probabilities, hard predictions and labels.
/// Zero denominators give 0.
pub fn binary_scores(positive: &[f64], predicted: &[usize], labels: &[usize]) -> ClassificationScores {
    let (mut tp, mut fp, mut fn_, mut correct) = (0usize, 0usize, 0usize, 0usize);
    for (&p, &l) in predicted.iter().zip(labels) {
        match (p, l) {
            (1, 1) => tp += 1,
            (1, _) => fp += 1,
            (_, 1) => fn_ += 1,
            _ => {}
        }
        if p == l {
            correct += 1;
        }
    }
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassificationScores {
        accuracy: ratio(correct, labels.len()),
        precision,
        recall,
        f1,
        auc: roc_auc(labels, positive),
    }
}

/// ROC AUC via the rank-sum statistic, averaging ranks over ties.
pub fn roc_auc(labels: &[usize], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&l| l == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum_pos += avg_rank * order[i..=j].iter().filter(|&&k| labels[k] == 1).count() as f64;
        i = j + 1;
    }

    let u = rank_sum_pos - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

/// Tracks metrics for one epoch of one fold
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_metric: f64,
    pub val_loss: f64,
    pub val_metric: f64,
    pub is_best: bool,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingHistory {
    pub fold: usize,
    pub task: Task,
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn new(fold: usize, task: Task) -> Self {
        Self {
            fold,
            task,
            epochs: Vec::new(),
        }
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        let name = self.task.metric_name();
        info!(
            "Fold {:>3} | Epoch {:>3} | lr {:.2e} | Train Loss: {:.4} | Train {name}: {:.4} | Val Loss: {:.4} | Val {name}: {:.4}{} | Time: {:.1}s",
            self.fold,
            metrics.epoch,
            metrics.learning_rate,
            metrics.train_loss,
            metrics.train_metric,
            metrics.val_loss,
            metrics.val_metric,
            if metrics.is_best { " *" } else { "" },
            metrics.duration_secs,
        );
        self.epochs.push(metrics);
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        write_csv(
            path.as_ref(),
            &[
                "epoch",
                "learning_rate",
                "train_loss",
                "train_metric",
                "val_loss",
                "val_metric",
                "is_best",
                "duration_secs",
            ],
            &self.epochs,
        )
    }

    /// Best validation metric under the task's polarity
    pub fn best_val_metric(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(|m| m.val_metric)
            .reduce(|a, b| if self.task.is_better(b, a) { b } else { a })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_classification_scores_one() {
        let labels = [0, 1, 1, 0, 1];
        let positive = [0.1, 0.9, 0.8, 0.3, 0.7];
        let scores = binary_scores(&positive, &labels, &labels);
        assert_eq!(scores.accuracy, 1.0);
        assert_eq!(scores.precision, 1.0);
        assert_eq!(scores.recall, 1.0);
        assert_eq!(scores.f1, 1.0);
        assert_eq!(scores.auc, Some(1.0));
    }

    #[test]
    fn precision_recall_from_counts() {
        // tp = 1, fp = 1, fn = 1, tn = 1
        let scores = binary_scores(&[0.6, 0.7, 0.2, 0.1], &[1, 1, 0, 0], &[1, 0, 1, 0]);
        assert_eq!(scores.accuracy, 0.5);
        assert_eq!(scores.precision, 0.5);
        assert_eq!(scores.recall, 0.5);
        assert_eq!(scores.f1, 0.5);
    }

    #[test]
    fn no_positive_predictions_score_zero() {
        let scores = binary_scores(&[0.1, 0.2], &[0, 0], &[1, 0]);
        assert_eq!(scores.precision, 0.0);
        assert_eq!(scores.recall, 0.0);
        assert_eq!(scores.f1, 0.0);
    }

    #[test]
    fn auc_averages_tied_ranks() {
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), Some(0.5));
        // pairs: two ordered, one tied, one inverted -> 2.5 / 4
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.4, 0.35]).unwrap();
        assert!((auc - 0.625).abs() < 1e-12);
    }

    #[test]
    fn auc_undefined_for_single_class() {
        assert_eq!(roc_auc(&[1, 1, 1], &[0.2, 0.5, 0.9]), None);
    }

    #[test]
    fn r2_conventions() {
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[2.0, 2.0]), 1.0);
        assert_eq!(r2_score(&[2.0, 2.0], &[1.0, 2.0]), 0.0);
        // predicting the mean explains nothing
        assert!(r2_score(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]).abs() < 1e-12);
    }

    #[test]
    fn best_val_metric_follows_polarity() {
        let mut reg = TrainingHistory::new(1, Task::Regression);
        let mut cls = TrainingHistory::new(1, Task::Classification);
        for (i, v) in [0.4, 0.2, 0.3].into_iter().enumerate() {
            let m = EpochMetrics { epoch: i + 1, val_metric: v, ..Default::default() };
            reg.push(m.clone());
            cls.push(m);
        }
        assert_eq!(reg.best_val_metric(), Some(0.2));
        assert_eq!(cls.best_val_metric(), Some(0.4));
    }
}

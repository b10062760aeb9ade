use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::training::metrics::r2_score;
use crate::training::task::Task;

/// One held-out example from a fold's test pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub id: String,
    pub target: f64,
    /// Denormalized prediction, or the positive-class probability
    pub prediction: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FoldResult {
    pub fold: usize,
    /// Primary metric of the test pass
    pub metric: f64,
    /// Regression only
    pub r2: Option<f64>,
    pub best_epoch: Option<usize>,
    #[serde(skip)]
    pub predictions: Vec<PredictionRecord>,
}

impl FoldResult {
    pub fn new(
        fold: usize,
        task: Task,
        metric: f64,
        best_epoch: Option<usize>,
        predictions: Vec<PredictionRecord>,
    ) -> Self {
        let r2 = match task {
            Task::Regression => {
                let (targets, preds): (Vec<f64>, Vec<f64>) =
                    predictions.iter().map(|p| (p.target, p.prediction)).unzip();
                Some(r2_score(&targets, &preds))
            }
            Task::Classification => None,
        };
        Self {
            fold,
            metric,
            r2,
            best_epoch,
            predictions,
        }
    }
}

/// Writes `header` and then one serialized row per item. The header is
/// written even when there are no rows.
pub(crate) fn write_csv<T, I>(path: &Path, header: &[&str], rows: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let write = || -> std::io::Result<()> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        writer.write_record(header)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()
    };
    write().map_err(|e| HarnessError::io(path, e))
}

/// Writes `id,target,prediction` rows.
pub fn write_predictions_csv(path: impl AsRef<Path>, records: &[PredictionRecord]) -> Result<()> {
    write_csv(path.as_ref(), &["id", "target", "prediction"], records)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FoldRow {
    pub fold: usize,
    pub metric: f64,
    pub r2: Option<f64>,
}

/// Cross-fold report handed to downstream reporting
#[derive(Debug, Clone, Serialize)]
pub struct CrossValidationSummary {
    pub task: Task,
    pub metric_name: &'static str,
    pub folds: Vec<FoldRow>,
    pub mean_metric: f64,
    /// Population standard deviation over folds
    pub std_metric: f64,
    pub mean_r2: Option<f64>,
    /// R2 of all out-of-fold predictions taken together
    pub overall_r2: Option<f64>,
    #[serde(skip)]
    pub ids: Vec<String>,
    #[serde(skip)]
    pub targets: Vec<f64>,
    #[serde(skip)]
    pub predictions: Vec<f64>,
}

impl CrossValidationSummary {
    /// `target - prediction` for every concatenated example
    pub fn residuals(&self) -> Vec<f64> {
        self.targets
            .iter()
            .zip(&self.predictions)
            .map(|(t, p)| t - p)
            .collect()
    }

    /// Writes `Fold,<metric>,R2`, leaving R2 empty where undefined.
    pub fn write_fold_table(&self, path: impl AsRef<Path>) -> Result<()> {
        write_csv(path.as_ref(), &["Fold", self.metric_name, "R2"], &self.folds)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| HarnessError::io(path, e))
    }
}

/// Collects fold results as folds finish
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    task: Task,
    results: Vec<FoldResult>,
}

impl ResultAggregator {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            results: Vec::new(),
        }
    }

    pub fn add_fold_result(&mut self, result: FoldResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[FoldResult] {
        &self.results
    }

    pub fn summary(&self) -> Result<CrossValidationSummary> {
        if self.results.is_empty() {
            return Err(HarnessError::InvalidDataset("no fold results to aggregate".into()));
        }
        let n = self.results.len() as f64;
        let mean_metric = self.results.iter().map(|r| r.metric).sum::<f64>() / n;
        let std_metric = (self
            .results
            .iter()
            .map(|r| (r.metric - mean_metric).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        let r2s: Option<Vec<f64>> = self.results.iter().map(|r| r.r2).collect();
        let mean_r2 = r2s.map(|v| v.iter().sum::<f64>() / n);

        let records = self.results.iter().flat_map(|r| &r.predictions);
        let ids = records.clone().map(|p| p.id.clone()).collect();
        let targets: Vec<f64> = records.clone().map(|p| p.target).collect();
        let predictions: Vec<f64> = records.map(|p| p.prediction).collect();
        let overall_r2 = match self.task {
            Task::Regression => Some(r2_score(&targets, &predictions)),
            Task::Classification => None,
        };

        Ok(CrossValidationSummary {
            task: self.task,
            metric_name: self.task.metric_name(),
            folds: self
                .results
                .iter()
                .map(|r| FoldRow {
                    fold: r.fold,
                    metric: r.metric,
                    r2: r.r2,
                })
                .collect(),
            mean_metric,
            std_metric,
            mean_r2,
            overall_r2,
            ids,
            targets,
            predictions,
        })
    }
}

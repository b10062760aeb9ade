use crate::training::task::{MetricSet, Task};

/// Streaming weighted average of a scalar.
///
/// `avg` reads 0 until the first observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    val: f64,
    sum: f64,
    count: f64,
    avg: f64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Folds in `value` observed `weight` times (a batch mean with the
    /// batch size as weight). Zero weight only updates `val`.
    pub fn update(&mut self, value: f64, weight: usize) {
        self.val = value;
        if weight == 0 {
            return;
        }
        self.sum += value * weight as f64;
        self.count += weight as f64;
        self.avg = self.sum / self.count;
    }

    pub fn push(&mut self, value: f64) {
        self.update(value, 1);
    }

    /// Most recent observation
    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> f64 {
        self.count
    }
}

/// Loss and task metrics for one epoch phase
#[derive(Debug, Clone, Default)]
pub struct TaskMeters {
    pub loss: RunningStat,
    pub mae: RunningStat,
    pub accuracy: RunningStat,
    pub precision: RunningStat,
    pub recall: RunningStat,
    pub f1: RunningStat,
    pub auc: RunningStat,
}

impl TaskMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f64, metrics: &MetricSet, weight: usize) {
        self.loss.update(loss, weight);
        match metrics {
            MetricSet::Regression { mae } => self.mae.update(*mae, weight),
            MetricSet::Classification(s) => {
                self.accuracy.update(s.accuracy, weight);
                self.precision.update(s.precision, weight);
                self.recall.update(s.recall, weight);
                self.f1.update(s.f1, weight);
                // single-class batches have no AUC
                if let Some(auc) = s.auc {
                    self.auc.update(auc, weight);
                }
            }
        }
    }

    /// Running average of the metric that selects checkpoints
    pub fn primary(&self, task: Task) -> f64 {
        match task {
            Task::Regression => self.mae.avg(),
            Task::Classification => self.auc.avg(),
        }
    }

    /// "current (average)" pairs for progress lines
    pub fn progress(&self, task: Task) -> String {
        let pair = |name: &str, m: &RunningStat| format!("{name} {:.3} ({:.3})", m.val(), m.avg());
        let loss = format!("Loss {:.4} ({:.4})", self.loss.val(), self.loss.avg());
        match task {
            Task::Regression => format!("{loss}  {}", pair("MAE", &self.mae)),
            Task::Classification => format!(
                "{loss}  {}  {}  {}  {}  {}",
                pair("Accu", &self.accuracy),
                pair("Precision", &self.precision),
                pair("Recall", &self.recall),
                pair("F1", &self.f1),
                pair("AUC", &self.auc),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::ClassificationScores;

    #[test]
    fn average_is_weighted_by_count() {
        let obs = [(2.0, 3usize), (5.0, 1), (-1.0, 4), (0.5, 2)];
        let mut stat = RunningStat::new();
        for (v, w) in obs {
            stat.update(v, w);
        }
        let expected = obs.iter().map(|(v, w)| v * *w as f64).sum::<f64>()
            / obs.iter().map(|(_, w)| *w as f64).sum::<f64>();
        assert!((stat.avg() - expected).abs() < 1e-12);
        assert_eq!(stat.val(), 0.5);
        assert_eq!(stat.count(), 10.0);
    }

    #[test]
    fn empty_and_reset_read_zero() {
        let mut stat = RunningStat::new();
        assert_eq!(stat.avg(), 0.0);
        stat.push(4.0);
        stat.push(6.0);
        assert_eq!(stat.avg(), 5.0);
        stat.reset();
        assert_eq!(stat, RunningStat::default());
    }

    #[test]
    fn zero_weight_leaves_average() {
        let mut stat = RunningStat::new();
        stat.update(3.0, 2);
        stat.update(100.0, 0);
        assert_eq!(stat.avg(), 3.0);
        assert_eq!(stat.val(), 100.0);
    }

    #[test]
    fn missing_auc_is_skipped() {
        let mut meters = TaskMeters::new();
        let with_auc = ClassificationScores {
            accuracy: 1.0,
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
            auc: Some(0.8),
        };
        let without = ClassificationScores { auc: None, ..with_auc };
        meters.record(0.1, &MetricSet::Classification(with_auc), 4);
        meters.record(0.1, &MetricSet::Classification(without), 4);
        assert_eq!(meters.primary(Task::Classification), 0.8);
        assert_eq!(meters.accuracy.count(), 8.0);
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::training::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam with optional weight decay
    #[default]
    Adam,
    /// SGD with momentum and optional weight decay
    Sgd,
}

/// Which parameters produce a fold's held-out predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FinalEval {
    /// Reload the fold's best checkpoint before the test pass
    #[default]
    BestCheckpoint,
    /// Use the parameters left in memory after the last epoch
    LastEpoch,
}

/// Architecture hyperparameters handed to the model factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelHyperParams {
    /// Hidden atom features in the convolution layers
    pub atom_fea_len: usize,
    /// Number of convolution layers
    pub n_conv: usize,
    /// Hidden features after pooling
    pub h_fea_len: usize,
    /// Number of hidden layers after pooling
    pub n_h: usize,
}

impl Default for ModelHyperParams {
    fn default() -> Self {
        Self {
            atom_fea_len: 64,
            n_conv: 3,
            h_fea_len: 128,
            n_h: 1,
        }
    }
}

/// All run settings in one place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub task: Task,
    /// Number of full passes through each fold's training data
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs at which the learning rate is multiplied by `lr_gamma`
    pub lr_milestones: Vec<usize>,
    pub lr_gamma: f64,
    pub optimizer: OptimizerKind,
    /// SGD only
    pub momentum: f64,
    pub weight_decay: f64,
    /// Log progress every N batches
    pub print_freq: usize,
    /// Data loading worker threads (0 loads on the training thread)
    pub workers: usize,
    pub folds: usize,
    /// Seed for the fold shuffle and the normalizer sample
    pub seed: u64,
    /// Targets sampled to fit the normalizer
    pub normalizer_sample_size: usize,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    pub final_eval: FinalEval,
    pub model: ModelHyperParams,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            task: Task::Regression,
            epochs: 30,
            batch_size: 256,
            learning_rate: 0.01,
            lr_milestones: vec![100],
            lr_gamma: 0.1,
            optimizer: OptimizerKind::Adam,
            momentum: 0.9,
            weight_decay: 0.0,
            print_freq: 10,
            workers: 0,
            folds: 50,
            seed: 42,
            normalizer_sample_size: 500,
            checkpoint_dir: PathBuf::from("checkpoints"),
            output_dir: PathBuf::from("."),
            final_eval: FinalEval::BestCheckpoint,
            model: ModelHyperParams::default(),
        }
    }
}

impl HarnessConfig {
    /// Smaller config for quick testing
    pub fn quick_test() -> Self {
        Self {
            epochs: 3,
            batch_size: 8,
            folds: 5,
            print_freq: 5,
            model: ModelHyperParams {
                atom_fea_len: 16,
                n_conv: 1,
                h_fea_len: 32,
                n_h: 1,
            },
            ..Self::default()
        }
    }

    /// Reads a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Ok(toml::from_str(&text)?)
    }

    /// Rejects settings that would fail or silently misbehave mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.folds < 2 {
            return Err(HarnessError::invalid("folds", self.folds, "need at least 2 folds"));
        }
        if self.epochs == 0 {
            return Err(HarnessError::invalid("epochs", self.epochs, "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(HarnessError::invalid("batch_size", self.batch_size, "must be positive"));
        }
        if self.print_freq == 0 {
            return Err(HarnessError::invalid("print_freq", self.print_freq, "must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(HarnessError::invalid(
                "learning_rate",
                self.learning_rate,
                "must be finite and positive",
            ));
        }
        if !(self.lr_gamma > 0.0 && self.lr_gamma <= 1.0) {
            return Err(HarnessError::invalid("lr_gamma", self.lr_gamma, "must be in (0, 1]"));
        }
        if self.lr_milestones.windows(2).any(|w| w[0] >= w[1]) {
            return Err(HarnessError::invalid(
                "lr_milestones",
                format!("{:?}", self.lr_milestones),
                "must be strictly increasing",
            ));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(HarnessError::invalid(
                "weight_decay",
                self.weight_decay,
                "must be finite and non-negative",
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(HarnessError::invalid("momentum", self.momentum, "must be in [0, 1)"));
        }
        if self.normalizer_sample_size < 2 {
            return Err(HarnessError::invalid(
                "normalizer_sample_size",
                self.normalizer_sample_size,
                "need at least 2 targets",
            ));
        }
        let m = &self.model;
        if m.atom_fea_len == 0 || m.h_fea_len == 0 || m.n_h == 0 {
            return Err(HarnessError::Config(format!(
                "model widths and hidden layer count must be positive: {m:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(HarnessConfig::default().validate().is_ok());
        assert!(HarnessConfig::quick_test().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: HarnessConfig = toml::from_str(
            r#"
            task = "classification"
            folds = 10
            optimizer = "sgd"

            [model]
            n_conv = 4
            "#,
        )
        .unwrap();
        assert_eq!(cfg.task, Task::Classification);
        assert_eq!(cfg.folds, 10);
        assert_eq!(cfg.optimizer, OptimizerKind::Sgd);
        assert_eq!(cfg.model.n_conv, 4);
        assert_eq!(cfg.model.atom_fea_len, 64);
        assert_eq!(cfg.epochs, 30);
    }

    #[test]
    fn unknown_task_fails_to_parse() {
        let parsed: std::result::Result<HarnessConfig, _> = toml::from_str("task = \"ranking\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_bad_settings() {
        let bad = [
            HarnessConfig { folds: 1, ..HarnessConfig::default() },
            HarnessConfig { epochs: 0, ..HarnessConfig::default() },
            HarnessConfig { learning_rate: f64::NAN, ..HarnessConfig::default() },
            HarnessConfig { lr_gamma: 0.0, ..HarnessConfig::default() },
            HarnessConfig { lr_milestones: vec![20, 10], ..HarnessConfig::default() },
            HarnessConfig { normalizer_sample_size: 1, ..HarnessConfig::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }
}

pub mod checkpoint;
pub mod config;
pub mod folds;
pub mod meter;
pub mod metrics;
pub mod normalizer;
pub mod results;
pub mod scheduler;
pub mod steps;
pub mod task;
pub mod trainer;

pub use checkpoint::{CheckpointKind, CheckpointMeta, CheckpointStore};
pub use config::{FinalEval, HarnessConfig, ModelHyperParams, OptimizerKind};
pub use folds::{FoldSplit, KFold};
pub use meter::{RunningStat, TaskMeters};
pub use metrics::{EpochMetrics, TrainingHistory};
pub use normalizer::Normalizer;
pub use results::{CrossValidationSummary, FoldResult, PredictionRecord, ResultAggregator};
pub use scheduler::MultiStepLr;
pub use steps::{EvalMode, PhaseStats, StepContext};
pub use task::{BestTracker, MetricSet, Task};
pub use trainer::{run_cross_validation, CrossValidationReport, FoldOutcome, RunPhase};

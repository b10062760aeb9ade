use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    optim::{decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, Optimizer, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::data::{check_binary_labels, collate, fold_loader, CrystalItem, FoldSubset};
use crate::error::{HarnessError, Result};
use crate::model::{CrystalModel, ModelShape};
use crate::training::{
    checkpoint::{CheckpointKind, CheckpointMeta, CheckpointStore},
    config::{FinalEval, HarnessConfig, OptimizerKind},
    folds::{FoldSplit, KFold},
    metrics::{EpochMetrics, TrainingHistory},
    normalizer::{sample_targets, Normalizer},
    results::{write_predictions_csv, CrossValidationSummary, FoldResult, ResultAggregator},
    scheduler::MultiStepLr,
    steps::{evaluate, train_epoch, EvalMode, StepContext},
    task::{BestTracker, Task},
};

/// Where the orchestrator is in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Splitting,
    /// 1-based fold number
    TrainingFold(usize),
    Aggregating,
    Done,
}

impl RunPhase {
    /// Legal successors for a run of `folds` folds
    pub fn can_advance_to(self, next: RunPhase, folds: usize) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Init, Splitting) => true,
            (Splitting, TrainingFold(1)) => folds >= 1,
            (TrainingFold(k), TrainingFold(j)) => j == k + 1 && j <= folds,
            (TrainingFold(k), Aggregating) => k == folds,
            (Aggregating, Done) => true,
            _ => false,
        }
    }
}

struct PhaseTracker {
    phase: RunPhase,
    folds: usize,
}

impl PhaseTracker {
    fn new(folds: usize) -> Self {
        Self {
            phase: RunPhase::Init,
            folds,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next, self.folds),
            "illegal transition {:?} -> {next:?}",
            self.phase
        );
        info!(from = ?self.phase, to = ?next, "run phase");
        self.phase = next;
    }
}

/// Everything a finished fold leaves behind
#[derive(Debug, Clone)]
pub struct FoldOutcome {
    pub result: FoldResult,
    pub history: TrainingHistory,
    /// Best validation metric recorded in the fold's checkpoint
    pub best_metric: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CrossValidationReport {
    pub summary: CrossValidationSummary,
    pub folds: Vec<FoldOutcome>,
}

/// Trains and evaluates one fresh model per fold and aggregates the
/// held-out results.
///
/// `build_model` is called once per fold. Artifacts go to the configured
/// checkpoint and output directories.
pub fn run_cross_validation<B, M, D, F>(
    dataset: D,
    config: &HarnessConfig,
    mut build_model: F,
    device: &B::Device,
) -> Result<CrossValidationReport>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + CrystalModel<B>,
    M::InnerModule: CrystalModel<B::InnerBackend>,
    D: Dataset<CrystalItem> + 'static,
    F: FnMut(&ModelShape, &B::Device) -> M,
{
    let mut phase = PhaseTracker::new(config.folds);
    config.validate()?;

    let sample = dataset
        .get(0)
        .ok_or_else(|| HarnessError::InvalidDataset("dataset is empty".into()))?;
    if config.task == Task::Classification {
        check_binary_labels(&dataset)?;
    }
    let shape = ModelShape::from_sample(&sample, &config.model, config.task);

    info!(
        task = ?config.task,
        examples = dataset.len(),
        folds = config.folds,
        epochs = config.epochs,
        optimizer = ?config.optimizer,
        "starting cross-validation"
    );
    match config.final_eval {
        FinalEval::BestCheckpoint => info!("held-out predictions come from each fold's best checkpoint"),
        FinalEval::LastEpoch => info!("held-out predictions come from each fold's last-epoch model"),
    }

    // output width is checked on one structure before anything is written
    let first = build_model(&shape, device);
    let trial = collate::<B::InnerBackend>(std::slice::from_ref(&sample), device);
    let [_, width] = first.valid().forward(trial.input).dims();
    config.task.check_output_width(width)?;
    let mut first_model = Some(first);

    phase.advance(RunPhase::Splitting);
    let splits = KFold::new(config.folds)
        .with_seed(config.seed)
        .split(dataset.len())?;

    fs::create_dir_all(&config.output_dir).map_err(|e| HarnessError::io(&config.output_dir, e))?;
    let store = CheckpointStore::new(&config.checkpoint_dir)?;
    let dataset = Arc::new(dataset);

    let mut aggregator = ResultAggregator::new(config.task);
    let mut outcomes = Vec::with_capacity(splits.len());
    for split in splits {
        phase.advance(RunPhase::TrainingFold(split.fold));
        let model = first_model.take().unwrap_or_else(|| build_model(&shape, device));
        let outcome = match config.optimizer {
            OptimizerKind::Adam => {
                let optim = AdamConfig::new()
                    .with_weight_decay(weight_decay(config))
                    .init::<B, M>();
                train_fold(&split, &dataset, config, &store, model, optim, device)?
            }
            OptimizerKind::Sgd => {
                let momentum = MomentumConfig::new()
                    .with_momentum(config.momentum)
                    .with_dampening(0.0);
                let optim = SgdConfig::new()
                    .with_momentum((config.momentum > 0.0).then_some(momentum))
                    .with_weight_decay(weight_decay(config))
                    .init::<B, M>();
                train_fold(&split, &dataset, config, &store, model, optim, device)?
            }
        };
        aggregator.add_fold_result(outcome.result.clone());
        outcomes.push(outcome);
    }

    phase.advance(RunPhase::Aggregating);
    let summary = aggregator.summary()?;
    summary.write_fold_table(config.output_dir.join("cross_validation_results.csv"))?;
    summary.write_json(config.output_dir.join("cv_summary.json"))?;

    phase.advance(RunPhase::Done);
    match summary.mean_r2 {
        Some(r2) => info!(
            "Cross-validation {}: {:.4} +/- {:.4} | mean R2 {:.4}",
            summary.metric_name, summary.mean_metric, summary.std_metric, r2
        ),
        None => info!(
            "Cross-validation {}: {:.4} +/- {:.4}",
            summary.metric_name, summary.mean_metric, summary.std_metric
        ),
    }

    Ok(CrossValidationReport {
        summary,
        folds: outcomes,
    })
}

fn weight_decay(config: &HarnessConfig) -> Option<WeightDecayConfig> {
    (config.weight_decay > 0.0).then(|| WeightDecayConfig::new(config.weight_decay as f32))
}

/// Fits the fold's normalizer on a sample of the whole dataset.
fn fold_normalizer<D>(dataset: &D, config: &HarnessConfig, fold: usize) -> Result<Normalizer>
where
    D: Dataset<CrystalItem>,
{
    match config.task {
        Task::Regression => {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(fold as u64));
            let sample = sample_targets(dataset, config.normalizer_sample_size, &mut rng);
            let normalizer = Normalizer::fit(&sample)?;
            info!(fold, mean = normalizer.mean(), std = normalizer.std(), "fitted normalizer");
            Ok(normalizer)
        }
        Task::Classification => Ok(Normalizer::identity()),
    }
}

fn train_fold<B, M, D, O>(
    split: &FoldSplit,
    dataset: &Arc<D>,
    config: &HarnessConfig,
    store: &CheckpointStore,
    mut model: M,
    mut optimizer: O,
    device: &B::Device,
) -> Result<FoldOutcome>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + CrystalModel<B>,
    M::InnerModule: CrystalModel<B::InnerBackend>,
    D: Dataset<CrystalItem> + 'static,
    O: Optimizer<M, B>,
{
    let fold = split.fold;
    let task = config.task;
    info!(
        fold,
        train = split.train_indices.len(),
        val = split.val_indices.len(),
        params = model.num_params(),
        "training fold"
    );

    let normalizer = fold_normalizer(dataset.as_ref(), config, fold)?;
    let train_loader = fold_loader::<B, D>(
        FoldSubset::new(dataset.clone(), split.train_indices.clone()),
        config.batch_size,
        config.workers,
        Some(config.seed.wrapping_add(fold as u64)),
        device,
    );
    let val_loader = fold_loader::<B::InnerBackend, D>(
        FoldSubset::new(dataset.clone(), split.val_indices.clone()),
        config.batch_size,
        config.workers,
        None,
        device,
    );

    let mut scheduler = MultiStepLr::new(config.learning_rate, config.lr_milestones.clone(), config.lr_gamma);
    let mut tracker = BestTracker::new(task);
    let mut history = TrainingHistory::new(fold, task);

    for epoch in 1..=config.epochs {
        let start = Instant::now();
        let lr = scheduler.lr();
        let ctx = StepContext {
            task,
            normalizer: &normalizer,
            fold,
            epoch,
            print_freq: config.print_freq,
        };

        let train = train_epoch(&mut model, &mut optimizer, &train_loader, lr, &ctx)?;
        let val = evaluate(&model.valid(), &val_loader, &ctx, EvalMode::Validate)?;
        let val_metric = val.metric(task);
        let is_best = tracker.observe(epoch, val_metric);

        // saved state resumes at the next epoch
        scheduler.step();
        let meta = CheckpointMeta {
            fold,
            epoch,
            metric_name: task.metric_name().to_string(),
            metric: val_metric,
            best_metric: tracker.best(),
            learning_rate: lr,
            scheduler: scheduler.clone(),
            normalizer,
        };
        store.save::<B, _, _>(&meta, &model, &optimizer, is_best)?;

        history.push(EpochMetrics {
            epoch,
            learning_rate: lr,
            train_loss: train.loss(),
            train_metric: train.metric(task),
            val_loss: val.loss(),
            val_metric,
            is_best,
            duration_secs: start.elapsed().as_secs_f64(),
        });
    }

    let test_model = match (config.final_eval, tracker.best_epoch()) {
        (FinalEval::BestCheckpoint, Some(best_epoch)) => {
            info!(fold, best_epoch, "reloading best checkpoint for the test pass");
            store.load_model::<B::InnerBackend, _>(fold, CheckpointKind::Best, model.valid(), device)?
        }
        (FinalEval::BestCheckpoint, None) => {
            warn!(fold, "no epoch produced a comparable metric, testing the last-epoch model");
            model.valid()
        }
        (FinalEval::LastEpoch, _) => model.valid(),
    };

    let ctx = StepContext {
        task,
        normalizer: &normalizer,
        fold,
        epoch: config.epochs,
        print_freq: config.print_freq,
    };
    let test = evaluate(&test_model, &val_loader, &ctx, EvalMode::Test)?;
    let result = FoldResult::new(fold, task, test.metric(task), tracker.best_epoch(), test.predictions);

    write_fold_artifacts(&config.output_dir, &result, &history)?;
    match result.r2 {
        Some(r2) => info!(fold, "Fold {fold} test {}: {:.4} | R2 {:.4}", task.metric_name(), result.metric, r2),
        None => info!(fold, "Fold {fold} test {}: {:.4}", task.metric_name(), result.metric),
    }

    Ok(FoldOutcome {
        result,
        history,
        best_metric: tracker.best(),
    })
}

fn write_fold_artifacts(dir: &Path, result: &FoldResult, history: &TrainingHistory) -> Result<()> {
    let fold = result.fold;
    write_predictions_csv(dir.join(format!("test_results_fold_{fold}.csv")), &result.predictions)?;
    history.save_csv(dir.join(format!("training_history_fold_{fold}.csv")))
}

use std::time::Instant;

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use tracing::debug;

use crate::data::FoldLoader;
use crate::error::{HarnessError, Result};
use crate::model::CrystalModel;
use crate::training::meter::{RunningStat, TaskMeters};
use crate::training::normalizer::Normalizer;
use crate::training::results::PredictionRecord;
use crate::training::task::{MetricSet, Task};

/// Run state passed to every step in place of globals
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub task: Task,
    pub normalizer: &'a Normalizer,
    pub fold: usize,
    pub epoch: usize,
    /// Progress is logged every this many batches
    pub print_freq: usize,
}

impl StepContext<'_> {
    fn check_finite(&self, what: &'static str, value: f64, batch: usize) -> Result<()> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(HarnessError::NonFinite {
                what,
                value,
                fold: self.fold,
                epoch: self.epoch,
                batch,
            })
        }
    }

    fn should_print(&self, batch: usize) -> bool {
        self.print_freq > 0 && batch % self.print_freq == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Validate,
    /// Also collects per-example predictions
    Test,
}

/// Meters for one pass over a loader
#[derive(Debug, Clone, Default)]
pub struct PhaseStats {
    pub meters: TaskMeters,
    pub batch_time: RunningStat,
    pub batches: usize,
    pub predictions: Vec<PredictionRecord>,
}

impl PhaseStats {
    pub fn loss(&self) -> f64 {
        self.meters.loss.avg()
    }

    pub fn metric(&self, task: Task) -> f64 {
        self.meters.primary(task)
    }
}

fn host_outputs<B: Backend>(output: Tensor<B, 2>) -> Result<(Vec<f32>, usize)> {
    let [_, width] = output.dims();
    let values = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| HarnessError::Tensor(format!("{e:?}")))?;
    Ok((values, width))
}

/// One optimizer step per batch over the fold's training side.
pub fn train_epoch<B, M, O>(
    model: &mut M,
    optimizer: &mut O,
    loader: &FoldLoader<B>,
    lr: f64,
    ctx: &StepContext,
) -> Result<PhaseStats>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + CrystalModel<B>,
    O: Optimizer<M, B>,
{
    let mut stats = PhaseStats::default();
    let mut end = Instant::now();

    for batch in loader.iter() {
        let n = batch.len();
        let batch_idx = stats.batches + 1;

        let output = model.forward(batch.input);
        let loss = ctx.task.loss(output.clone(), batch.targets, ctx.normalizer);
        let loss_value: f64 = loss.clone().into_scalar().elem();
        ctx.check_finite("training loss", loss_value, batch_idx)?;

        let (values, width) = host_outputs(output.detach())?;
        let metrics: MetricSet =
            ctx.task
                .compute_metrics(&values, width, &batch.target_values, ctx.normalizer)?;
        stats.meters.record(loss_value, &metrics, n);

        // fresh gradients every batch, consumed by the step
        let grads = GradientsParams::from_grads(loss.backward(), model);
        *model = optimizer.step(lr, model.clone(), grads);

        stats.batches = batch_idx;
        stats.batch_time.push(end.elapsed().as_secs_f64());
        end = Instant::now();

        if ctx.should_print(batch_idx) {
            debug!(
                "Fold {} Epoch {} [{batch_idx}] Time {:.3} ({:.3})  {}",
                ctx.fold,
                ctx.epoch,
                stats.batch_time.val(),
                stats.batch_time.avg(),
                stats.meters.progress(ctx.task),
            );
        }
    }

    Ok(stats)
}

/// Forward-only pass; `model` is expected to be the inner module from
/// `AutodiffModule::valid`.
pub fn evaluate<B, M>(model: &M, loader: &FoldLoader<B>, ctx: &StepContext, mode: EvalMode) -> Result<PhaseStats>
where
    B: Backend,
    M: CrystalModel<B>,
{
    let mut stats = PhaseStats::default();
    let mut end = Instant::now();

    for batch in loader.iter() {
        let n = batch.len();
        let batch_idx = stats.batches + 1;

        let output = model.forward(batch.input);
        let loss = ctx.task.loss(output.clone(), batch.targets, ctx.normalizer);
        let loss_value: f64 = loss.into_scalar().elem();
        ctx.check_finite("validation loss", loss_value, batch_idx)?;

        let (values, width) = host_outputs(output)?;
        let metrics = ctx
            .task
            .compute_metrics(&values, width, &batch.target_values, ctx.normalizer)?;
        stats.meters.record(loss_value, &metrics, n);

        if mode == EvalMode::Test {
            let predictions = ctx.task.prediction_values(&values, width, ctx.normalizer)?;
            stats.predictions.extend(
                batch
                    .ids
                    .into_iter()
                    .zip(&batch.target_values)
                    .zip(predictions)
                    .map(|((id, &target), prediction)| PredictionRecord {
                        id,
                        target: target as f64,
                        prediction,
                    }),
            );
        }

        stats.batches = batch_idx;
        stats.batch_time.push(end.elapsed().as_secs_f64());
        end = Instant::now();

        if ctx.should_print(batch_idx) {
            debug!(
                "Fold {} {} [{batch_idx}] Time {:.3} ({:.3})  {}",
                ctx.fold,
                if mode == EvalMode::Test { "Test" } else { "Validate" },
                stats.batch_time.val(),
                stats.batch_time.avg(),
                stats.meters.progress(ctx.task),
            );
        }
    }

    Ok(stats)
}

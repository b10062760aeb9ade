use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crystal_kfold::{
    data::CrystalDataset,
    default_device,
    model::CrystalGraphConvNetConfig,
    run_cross_validation,
    training::{FinalEval, OptimizerKind},
    AutodiffTrainBackend, HarnessConfig, Task,
};

/// K-fold cross-validation of a crystal graph network
#[derive(Parser, Debug)]
#[command(name = "crystal-kfold", version, about)]
struct Args {
    /// Featurized structures, one JSON object per line
    data: PathBuf,

    /// TOML run configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start from the small quick-test configuration
    #[arg(long)]
    quick: bool,

    #[arg(long, value_enum)]
    task: Option<Task>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    folds: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(long = "lr")]
    learning_rate: Option<f64>,

    #[arg(long, value_enum)]
    optimizer: Option<OptimizerKind>,

    #[arg(long, value_enum)]
    final_eval: Option<FinalEval>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(short, long)]
    workers: Option<usize>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<HarnessConfig> {
        let mut config = match (&self.config, self.quick) {
            (Some(path), _) => HarnessConfig::from_toml_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            (None, true) => HarnessConfig::quick_test(),
            (None, false) => HarnessConfig::default(),
        };

        if let Some(task) = self.task {
            config.task = task;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(folds) = self.folds {
            config.folds = folds;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(optimizer) = self.optimizer {
            config.optimizer = optimizer;
        }
        if let Some(final_eval) = self.final_eval {
            config.final_eval = final_eval;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.config()?;

    let dataset = CrystalDataset::from_jsonl(&args.data)
        .with_context(|| format!("loading dataset {}", args.data.display()))?;
    tracing::info!(path = %args.data.display(), structures = dataset.len(), "loaded dataset");

    let device = default_device();
    tracing::info!(?device, "using device");

    let report = run_cross_validation::<AutodiffTrainBackend, _, _, _>(
        dataset,
        &config,
        |shape, device| CrystalGraphConvNetConfig::new(shape.clone()).init::<AutodiffTrainBackend>(device),
        &device,
    )
    .context("cross-validation failed")?;

    let summary = &report.summary;
    println!("\n=== Cross-validation complete ===");
    for row in &summary.folds {
        match row.r2 {
            Some(r2) => println!("Fold {:>3}: {} {:.4} | R2 {:.4}", row.fold, summary.metric_name, row.metric, r2),
            None => println!("Fold {:>3}: {} {:.4}", row.fold, summary.metric_name, row.metric),
        }
    }
    println!(
        "Mean {}: {:.4} +/- {:.4}",
        summary.metric_name, summary.mean_metric, summary.std_metric
    );
    if let Some(r2) = summary.overall_r2 {
        println!("Overall R2 of held-out predictions: {r2:.4}");
    }
    println!("Results written to {}", config.output_dir.display());

    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::training::normalizer::Normalizer;
use crate::training::scheduler::MultiStepLr;

pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

const RECORD_EXT: &str = "mpk";
const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Overwritten every epoch
    Latest,
    /// Overwritten when the validation metric improves
    Best,
}

/// Everything except the parameter and optimizer records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub fold: usize,
    pub epoch: usize,
    pub metric_name: String,
    /// Validation metric of this epoch
    pub metric: f64,
    /// Best validation metric so far, this epoch included
    pub best_metric: Option<f64>,
    pub learning_rate: f64,
    pub scheduler: MultiStepLr,
    pub normalizer: Normalizer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFiles {
    pub model: PathBuf,
    pub optimizer: PathBuf,
    pub meta: PathBuf,
}

impl CheckpointFiles {
    fn all(&self) -> [&Path; 3] {
        [&self.model, &self.optimizer, &self.meta]
    }
}

/// Latest and best snapshots for every fold under one directory.
///
/// Files are staged next to the destination and renamed into place, so a
/// reader never sees a half-written file. The metadata is renamed last and
/// removed before a set is replaced: a metadata file names the epoch of a
/// complete set.
pub struct CheckpointStore {
    dir: PathBuf,
    recorder: CheckpointRecorder,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let staging = dir.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|e| HarnessError::io(&staging, e))?;
        Ok(Self {
            dir,
            recorder: CheckpointRecorder::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(fold: usize, kind: CheckpointKind) -> String {
        match kind {
            CheckpointKind::Latest => format!("checkpoint_fold_{fold}"),
            CheckpointKind::Best => format!("model_best_fold_{fold}"),
        }
    }

    fn files_in(dir: &Path, fold: usize, kind: CheckpointKind) -> CheckpointFiles {
        let stem = Self::stem(fold, kind);
        CheckpointFiles {
            model: dir.join(format!("{stem}.{RECORD_EXT}")),
            optimizer: dir.join(format!("{stem}-optim.{RECORD_EXT}")),
            meta: dir.join(format!("{stem}.json")),
        }
    }

    pub fn files(&self, fold: usize, kind: CheckpointKind) -> CheckpointFiles {
        Self::files_in(&self.dir, fold, kind)
    }

    pub fn exists(&self, fold: usize, kind: CheckpointKind) -> bool {
        self.files(fold, kind).all().iter().all(|p| p.exists())
    }

    /// Writes the latest snapshot and, when `is_best`, replaces the best
    /// snapshot with a copy of it.
    pub fn save<B, M, O>(&self, meta: &CheckpointMeta, model: &M, optimizer: &O, is_best: bool) -> Result<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let staging = self.dir.join(STAGING_DIR);
        let staged = Self::files_in(&staging, meta.fold, CheckpointKind::Latest);
        let latest = self.files(meta.fold, CheckpointKind::Latest);

        // the recorder appends its own extension
        <CheckpointRecorder as Recorder<B>>::record(
            &self.recorder,
            model.clone().into_record(),
            staged.model.with_extension(""),
        )
        .map_err(|e| checkpoint_error(&staged.model, e))?;
        <CheckpointRecorder as Recorder<B>>::record(
            &self.recorder,
            optimizer.to_record(),
            staged.optimizer.with_extension(""),
        )
        .map_err(|e| checkpoint_error(&staged.optimizer, e))?;
        let json = serde_json::to_vec_pretty(meta)?;
        fs::write(&staged.meta, json).map_err(|e| HarnessError::io(&staged.meta, e))?;

        commit(&staged, &latest)?;
        debug!(fold = meta.fold, epoch = meta.epoch, "saved latest checkpoint");

        if is_best {
            let staged_best = Self::files_in(&staging, meta.fold, CheckpointKind::Best);
            let best = self.files(meta.fold, CheckpointKind::Best);
            for (src, tmp) in latest.all().into_iter().zip(staged_best.all()) {
                fs::copy(src, tmp).map_err(|e| HarnessError::io(tmp, e))?;
            }
            commit(&staged_best, &best)?;
            debug!(fold = meta.fold, epoch = meta.epoch, "saved best checkpoint");
        }
        Ok(())
    }

    /// Loads a stored parameter snapshot into `model`.
    pub fn load_model<B, M>(&self, fold: usize, kind: CheckpointKind, model: M, device: &B::Device) -> Result<M>
    where
        B: Backend,
        M: Module<B>,
    {
        let path = self.files(fold, kind).model;
        let record = <CheckpointRecorder as Recorder<B>>::load(
            &self.recorder,
            path.with_extension(""),
            device,
        )
        .map_err(|e| checkpoint_error(&path, e))?;
        Ok(model.load_record(record))
    }

    pub fn load_metadata(&self, fold: usize, kind: CheckpointKind) -> Result<CheckpointMeta> {
        let path = self.files(fold, kind).meta;
        let bytes = fs::read(&path).map_err(|e| HarnessError::io(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Moves a staged set over `to`, metadata last.
fn commit(from: &CheckpointFiles, to: &CheckpointFiles) -> Result<()> {
    match fs::remove_file(&to.meta) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(HarnessError::io(&to.meta, e)),
    }
    for (src, dst) in from.all().into_iter().zip(to.all()) {
        fs::rename(src, dst).map_err(|e| HarnessError::io(dst, e))?;
    }
    Ok(())
}

fn checkpoint_error(path: &Path, err: impl std::fmt::Debug) -> HarnessError {
    HarnessError::Checkpoint {
        path: path.to_path_buf(),
        msg: format!("{err:?}"),
    }
}

//! K-fold cross-validation for crystal graph networks on burn.
//!
//! [`run_cross_validation`] splits a dataset into folds, trains a fresh
//! model per fold, keeps the latest and best checkpoint of each fold and
//! aggregates the held-out predictions.

pub mod data;
pub mod error;
pub mod model;
pub mod training;

use burn::tensor::backend::Backend;

pub use error::{HarnessError, Result};
pub use training::{run_cross_validation, CrossValidationReport, HarnessConfig, Task};

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;

pub type AutodiffTrainBackend = burn::backend::Autodiff<TrainBackend>;

/// Device every tensor of the run lives on
pub fn default_device() -> <TrainBackend as Backend>::Device {
    Default::default()
}

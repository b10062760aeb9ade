use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{activation, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::data::{CrystalInput, CrystalItem};
use crate::model::conv::{ConvLayer, ConvLayerConfig};
use crate::training::config::ModelHyperParams;
use crate::training::task::Task;

/// Anything the harness can train: a burn module mapping a crystal batch
/// to one row per crystal.
///
/// Regression models return `[n, 1]`; classification models return
/// log-probabilities `[n, classes]`.
pub trait CrystalModel<B: Backend>: Module<B> {
    fn forward(&self, input: CrystalInput<B>) -> Tensor<B, 2>;
}

/// Everything needed to construct a fresh model for one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelShape {
    pub orig_atom_fea_len: usize,
    pub nbr_fea_len: usize,
    pub atom_fea_len: usize,
    pub n_conv: usize,
    pub h_fea_len: usize,
    pub n_h: usize,
    pub task: Task,
}

impl ModelShape {
    /// Input widths come from a sample structure, the rest from config.
    pub fn from_sample(sample: &CrystalItem, params: &ModelHyperParams, task: Task) -> Self {
        Self {
            orig_atom_fea_len: sample.atom_width(),
            nbr_fea_len: sample.neighbor_width(),
            atom_fea_len: params.atom_fea_len,
            n_conv: params.n_conv,
            h_fea_len: params.h_fea_len,
            n_h: params.n_h,
            task,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrystalGraphConvNetConfig {
    pub shape: ModelShape,
}

impl CrystalGraphConvNetConfig {
    pub fn new(shape: ModelShape) -> Self {
        Self { shape }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CrystalGraphConvNet<B> {
        let s = &self.shape;
        let convs = (0..s.n_conv)
            .map(|_| ConvLayerConfig::new(s.atom_fea_len, s.nbr_fea_len).init(device))
            .collect();
        let hidden = (1..s.n_h.max(1))
            .map(|_| LinearConfig::new(s.h_fea_len, s.h_fea_len).init(device))
            .collect();
        let output_classes = s.task.output_width();

        CrystalGraphConvNet {
            embedding: LinearConfig::new(s.orig_atom_fea_len, s.atom_fea_len).init(device),
            convs,
            conv_to_fc: LinearConfig::new(s.atom_fea_len, s.h_fea_len).init(device),
            hidden,
            head: LinearConfig::new(s.h_fea_len, output_classes).init(device),
            output_classes,
        }
    }
}

/// Default model: atom embedding, gated convolutions, mean pooling per
/// crystal, dense head.
#[derive(Module, Debug)]
pub struct CrystalGraphConvNet<B: Backend> {
    embedding: Linear<B>,
    convs: Vec<ConvLayer<B>>,
    conv_to_fc: Linear<B>,
    hidden: Vec<Linear<B>>,
    head: Linear<B>,
    output_classes: usize,
}

impl<B: Backend> CrystalGraphConvNet<B> {
    pub fn num_convs(&self) -> usize {
        self.convs.len()
    }
}

impl<B: Backend> CrystalModel<B> for CrystalGraphConvNet<B> {
    fn forward(&self, input: CrystalInput<B>) -> Tensor<B, 2> {
        let mut atoms = self.embedding.forward(input.atom_features);
        for conv in &self.convs {
            atoms = conv.forward(
                atoms,
                input.neighbor_features.clone(),
                input.neighbor_indices.clone(),
            );
        }

        let crystals = input.pooling.matmul(atoms);
        let mut x = activation::softplus(
            self.conv_to_fc.forward(activation::softplus(crystals, 1.0)),
            1.0,
        );
        for layer in &self.hidden {
            x = activation::softplus(layer.forward(x), 1.0);
        }

        let out = self.head.forward(x);
        if self.output_classes > 1 {
            activation::log_softmax(out, 1)
        } else {
            out
        }
    }
}

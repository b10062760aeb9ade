pub mod conv;
pub mod crystal_graph;

pub use conv::{ConvLayer, ConvLayerConfig};
pub use crystal_graph::{CrystalGraphConvNet, CrystalGraphConvNetConfig, CrystalModel, ModelShape};

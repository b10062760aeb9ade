use burn::{
    module::Module,
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    tensor::{activation, backend::Backend, Int, Tensor},
};

/// Configuration for one gated graph convolution
#[derive(Debug, Clone)]
pub struct ConvLayerConfig {
    pub atom_fea_len: usize,
    pub nbr_fea_len: usize,
}

impl ConvLayerConfig {
    pub fn new(atom_fea_len: usize, nbr_fea_len: usize) -> Self {
        Self {
            atom_fea_len,
            nbr_fea_len,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLayer<B> {
        let width = 2 * self.atom_fea_len;
        ConvLayer {
            fc_full: LinearConfig::new(width + self.nbr_fea_len, width).init(device),
            norm_gate: LayerNormConfig::new(width).init(device),
            norm_out: LayerNormConfig::new(self.atom_fea_len).init(device),
            atom_fea_len: self.atom_fea_len,
        }
    }
}

/// Gated convolution over each atom's bond list.
///
/// For atom i with neighbor j over bond k the layer computes
/// `sigmoid(z_f) * softplus(z_s)` from `z = W [v_i, v_j, u_ij]`, sums over
/// neighbors and adds the result back onto `v_i`.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    fc_full: Linear<B>,
    norm_gate: LayerNorm<B>,
    norm_out: LayerNorm<B>,
    atom_fea_len: usize,
}

impl<B: Backend> ConvLayer<B> {
    /// atoms: [n, f], bonds: [n, m, b], neighbors: [n, m] -> [n, f]
    pub fn forward(
        &self,
        atoms: Tensor<B, 2>,
        bonds: Tensor<B, 3>,
        neighbors: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let [n, m] = neighbors.dims();
        let f = self.atom_fea_len;

        let gathered = atoms
            .clone()
            .select(0, neighbors.reshape([n * m]))
            .reshape([n, m, f]);
        let center = atoms.clone().unsqueeze_dim::<3>(1).repeat_dim(1, m);

        let z = self
            .norm_gate
            .forward(self.fc_full.forward(Tensor::cat(vec![center, gathered, bonds], 2)));
        let filter = activation::sigmoid(z.clone().slice([0..n, 0..m, 0..f]));
        let core = activation::softplus(z.slice([0..n, 0..m, f..2 * f]), 1.0);

        let summed = (filter * core).sum_dim(1).reshape([n, f]);
        activation::softplus(atoms + self.norm_out.forward(summed), 1.0)
    }
}

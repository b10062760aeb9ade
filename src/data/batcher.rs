use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::data::dataset::CrystalItem;

/// Graph tensors for a batch of crystals, all atoms numbered batch-wide
#[derive(Debug, Clone)]
pub struct CrystalInput<B: Backend> {
    /// `[n_atoms, atom_width]`
    pub atom_features: Tensor<B, 2>,
    /// `[n_atoms, max_neighbors, neighbor_width]`
    pub neighbor_features: Tensor<B, 3>,
    /// `[n_atoms, max_neighbors]`, offset into the batch-wide atom numbering
    pub neighbor_indices: Tensor<B, 2, Int>,
    /// `[n_crystals, n_atoms]`, row c averages the atoms of crystal c
    pub pooling: Tensor<B, 2>,
}

#[derive(Debug, Clone)]
pub struct CrystalBatch<B: Backend> {
    pub input: CrystalInput<B>,
    /// Raw targets `[n_crystals, 1]`
    pub targets: Tensor<B, 2>,
    /// Host copy of the raw targets, same order as `ids`
    pub target_values: Vec<f32>,
    pub ids: Vec<String>,
}

impl<B: Backend> CrystalBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Collates crystals into one batch on the given device.
///
/// Items must share atom width, neighbor count and bond width, which
/// `CrystalDataset` guarantees on construction.
pub fn collate<B: Backend>(items: &[CrystalItem], device: &B::Device) -> CrystalBatch<B> {
    let n_crystals = items.len();
    let n_atoms: usize = items.iter().map(CrystalItem::num_atoms).sum();
    let (atom_width, max_nbr, nbr_width) = items.first().map_or((0, 0, 0), |item| {
        (item.atom_width(), item.max_neighbors(), item.neighbor_width())
    });

    let mut atom_flat = Vec::with_capacity(n_atoms * atom_width);
    let mut nbr_flat = Vec::with_capacity(n_atoms * max_nbr * nbr_width);
    let mut idx_flat: Vec<i32> = Vec::with_capacity(n_atoms * max_nbr);
    let mut pooling = vec![0.0f32; n_crystals * n_atoms];

    let mut base = 0;
    for (c, item) in items.iter().enumerate() {
        let n = item.num_atoms();
        for row in &item.atom_features {
            atom_flat.extend_from_slice(row);
        }
        for bonds in &item.neighbor_features {
            for bond in bonds {
                nbr_flat.extend_from_slice(bond);
            }
        }
        for neighbors in &item.neighbor_indices {
            idx_flat.extend(neighbors.iter().map(|&j| (base + j) as i32));
        }
        let weight = 1.0 / n as f32;
        pooling[c * n_atoms + base..c * n_atoms + base + n].fill(weight);
        base += n;
    }

    let target_values: Vec<f32> = items.iter().map(|item| item.target).collect();
    let ids = items.iter().map(|item| item.id.clone()).collect();

    let input = CrystalInput {
        atom_features: Tensor::<B, 1>::from_floats(atom_flat.as_slice(), device)
            .reshape([n_atoms, atom_width]),
        neighbor_features: Tensor::<B, 1>::from_floats(nbr_flat.as_slice(), device)
            .reshape([n_atoms, max_nbr, nbr_width]),
        neighbor_indices: Tensor::<B, 1, Int>::from_ints(idx_flat.as_slice(), device)
            .reshape([n_atoms, max_nbr]),
        pooling: Tensor::<B, 1>::from_floats(pooling.as_slice(), device)
            .reshape([n_crystals, n_atoms]),
    };
    let targets =
        Tensor::<B, 1>::from_floats(target_values.as_slice(), device).reshape([n_crystals, 1]);

    CrystalBatch {
        input,
        targets,
        target_values,
        ids,
    }
}

#[derive(Clone, Debug, Default)]
pub struct CrystalBatcher;

impl<B: Backend> Batcher<B, CrystalItem, CrystalBatch<B>> for CrystalBatcher {
    fn batch(&self, items: Vec<CrystalItem>, device: &B::Device) -> CrystalBatch<B> {
        collate(&items, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::chain_item;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn offsets_neighbor_indices_per_crystal() {
        let device = Default::default();
        let items = vec![chain_item("a", 2, 1.0), chain_item("b", 3, 2.0)];
        let batch = collate::<B>(&items, &device);

        assert_eq!(batch.input.atom_features.dims(), [5, 2]);
        assert_eq!(batch.input.neighbor_features.dims(), [5, 2, 3]);
        let idx = batch
            .input
            .neighbor_indices
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        // crystal b's atoms start at 2
        assert_eq!(&idx[..4], &[1, 1, 0, 0]);
        assert_eq!(&idx[4..], &[3, 4, 4, 2, 2, 3]);
        assert_eq!(batch.ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(batch.target_values, vec![1.0, 2.0]);
    }

    #[test]
    fn pooling_rows_average_own_atoms() {
        let device = Default::default();
        let items = vec![chain_item("a", 2, 1.0), chain_item("b", 3, 2.0)];
        let batch = collate::<B>(&items, &device);
        let pooled = batch
            .input
            .pooling
            .matmul(batch.input.atom_features)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        // first feature column is the atom position: mean(0,1) and mean(0,1,2)
        assert!((pooled[0] - 0.5).abs() < 1e-6);
        assert!((pooled[2] - 1.0).abs() < 1e-6);
        assert!((pooled[1] - 1.0).abs() < 1e-6);
    }
}

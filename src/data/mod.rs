pub mod batcher;
pub mod dataset;

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;

pub use batcher::{collate, CrystalBatch, CrystalBatcher, CrystalInput};
pub use dataset::{check_binary_labels, CrystalDataset, CrystalItem, FoldSubset};

pub type FoldLoader<B> = Arc<dyn DataLoader<B, CrystalBatch<B>>>;

/// Loader over one side of a fold. With a seed the order is reshuffled
/// every epoch; without one items come in subset order.
pub fn fold_loader<B, D>(
    subset: FoldSubset<D>,
    batch_size: usize,
    workers: usize,
    shuffle: Option<u64>,
    device: &B::Device,
) -> FoldLoader<B>
where
    B: Backend,
    D: Dataset<CrystalItem> + 'static,
{
    let builder = DataLoaderBuilder::new(CrystalBatcher)
        .batch_size(batch_size)
        .set_device(device.clone());
    let builder = match shuffle {
        Some(seed) => builder.shuffle(seed),
        None => builder,
    };
    // zero workers keeps loading on the training thread
    let builder = if workers > 0 {
        builder.num_workers(workers)
    } else {
        builder
    };
    builder.build(subset)
}

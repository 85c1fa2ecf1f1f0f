/// Batched sample iteration for the training loop
use rand::seq::SliceRandom;

use crate::tensor::Tensor;
use crate::{DatasetError, Result};

use super::{Dataset, Partition};

/// One batch of samples copied out of a dataset partition.
///
/// All three tensors hold the same number of sample slots; slot i of the
/// weight tensor is the dataset's shared per-pixel weight table, so loss
/// code never special-cases unweighted data.
pub struct Batch {
    pub data: Tensor,
    pub labels: Tensor,
    pub weights: Tensor,
}

impl Batch {
    /// Number of samples in this batch.
    pub fn len(&self) -> usize {
        self.data.samples()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterates one partition of a dataset in batches.
///
/// The final batch of a pass may be smaller than `batch_size`. With
/// shuffling enabled the visiting order is re-randomized on every
/// [`BatchLoader::reset`].
pub struct BatchLoader<D: Dataset> {
    dataset: D,
    partition: Partition,
    batch_size: usize,
    shuffle: bool,
    indices: Vec<usize>,
    cursor: usize,
}

impl<D: Dataset> BatchLoader<D> {
    /// Create a loader over one partition.
    pub fn new(dataset: D, partition: Partition, batch_size: usize, shuffle: bool) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        let count = match partition {
            Partition::Training => dataset.training_samples(),
            Partition::Testing => dataset.testing_samples(),
        };
        let mut indices: Vec<usize> = (0..count).collect();
        if shuffle {
            indices.shuffle(&mut rand::thread_rng());
        }
        Self {
            dataset,
            partition,
            batch_size,
            shuffle,
            indices,
            cursor: 0,
        }
    }

    /// Copy out the next batch, or `Ok(None)` when the pass is exhausted.
    ///
    /// Destination tensors are freshly allocated to the dataset's sample
    /// geometry, so a failed copy cannot come from this loader's own
    /// indices and is surfaced as a [`DatasetError::SampleCopy`].
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.cursor >= self.indices.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let count = end - self.cursor;
        let height = self.dataset.height();
        let width = self.dataset.width();

        let mut data = Tensor::new(count, self.dataset.input_maps(), height, width);
        let mut labels = Tensor::new(count, self.dataset.label_maps(), height, width);
        let mut weights = Tensor::new(count, 1, height, width);

        for (slot, &index) in self.indices[self.cursor..end].iter().enumerate() {
            let ok = match self.partition {
                Partition::Training => self
                    .dataset
                    .copy_training_sample(&mut data, &mut labels, &mut weights, slot, index),
                Partition::Testing => self
                    .dataset
                    .copy_testing_sample(&mut data, &mut labels, &mut weights, slot, index),
            };
            if !ok {
                return Err(DatasetError::SampleCopy {
                    partition: self.partition,
                    index,
                });
            }
        }

        self.cursor = end;
        Ok(Some(Batch {
            data,
            labels,
            weights,
        }))
    }

    /// Restart the pass; reshuffles when shuffling is enabled.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.indices.shuffle(&mut rand::thread_rng());
        }
    }

    /// Number of batches in one full pass.
    pub fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }

    /// The wrapped dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }
}

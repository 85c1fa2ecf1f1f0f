/// Dataset access for the training loop
pub mod loader;
pub mod tensor_stream;

pub use loader::{Batch, BatchLoader};
pub use tensor_stream::{count_records, RecordStream, TensorStreamDataset};

use std::fmt;

use crate::tensor::Tensor;

/// Which half of a dataset a stream or sample index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Training,
    Testing,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Training => write!(f, "training"),
            Partition::Testing => write!(f, "testing"),
        }
    }
}

/// The learning task a dataset's labels encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Per-pixel class labels over the input's spatial extent.
    SemanticSegmentation,
}

/// Query and sample-copy surface consumed by a training loop.
///
/// All queries are O(1) reads over state computed at load time. Nothing here
/// mutates the dataset, so implementations are `Send + Sync` and multiple
/// reader threads can retrieve samples concurrently without locking once
/// construction has completed.
pub trait Dataset: Send + Sync {
    /// The task this dataset is labeled for.
    fn task(&self) -> Task;

    /// Spatial width of every sample, in pixels.
    fn width(&self) -> usize;

    /// Spatial height of every sample, in pixels.
    fn height(&self) -> usize;

    /// Feature maps per input sample.
    fn input_maps(&self) -> usize;

    /// Feature maps per label sample.
    fn label_maps(&self) -> usize;

    /// Number of classes in the label encoding.
    fn classes(&self) -> usize;

    /// Ordered class names, one per class.
    fn class_names(&self) -> &[String];

    /// Number of training samples.
    fn training_samples(&self) -> usize;

    /// Number of testing samples.
    fn testing_samples(&self) -> usize;

    /// Whether a testing partition is present at all.
    fn supports_testing(&self) -> bool {
        self.testing_samples() > 0
    }

    /// Copy training sample `index` into slot `slot` of the caller's
    /// destination tensors: input into `data`, label into `label`, and the
    /// shared per-pixel weight table into `weight`.
    ///
    /// Returns `false` without copying when `index` is out of range;
    /// otherwise attempts all three copies and returns `true` only if every
    /// one succeeded. A `false` result from a geometry mismatch leaves no
    /// guarantee beyond "attempted all three, at least one failed".
    fn copy_training_sample(
        &self,
        data: &mut Tensor,
        label: &mut Tensor,
        weight: &mut Tensor,
        slot: usize,
        index: usize,
    ) -> bool;

    /// Mirror of [`Dataset::copy_training_sample`] for the testing partition.
    fn copy_testing_sample(
        &self,
        data: &mut Tensor,
        label: &mut Tensor,
        weight: &mut Tensor,
        slot: usize,
        index: usize,
    ) -> bool;
}

//! Streaming tensor dataset loader for supervised training
//!
//! A dataset source is a pair of binary streams (training and testing) of
//! serialized tensor records in which data and label records alternate.
//! Loading is a two-pass protocol:
//!
//! - **Count**: each stream is scanned record by record, without retaining
//!   payloads, until the zero-element sentinel record or clean end of
//!   stream, so storage can be allocated to the exact sample count.
//! - **Fill**: the streams are rewound and decoded into the sample store,
//!   training pairs first, testing pairs after them, which fixes the
//!   partition boundary as a single offset.
//!
//! A per-pixel loss-weight table is derived once at load time from a
//! pluggable weighting callback and attached to every sample the dataset
//! serves, so training loops never special-case unweighted data.
//!
//! # Example
//!
//! ```ignore
//! use segstream::{BatchLoader, Dataset, Partition, TensorStreamDataset};
//!
//! let dataset = TensorStreamDataset::from_config_file("kitti.set")?;
//! log::info!("{} training samples", dataset.training_samples());
//!
//! let mut loader = BatchLoader::new(dataset, Partition::Training, 16, true);
//! while let Some(batch) = loader.next_batch()? {
//!     // feed batch.data / batch.labels / batch.weights to the model
//! }
//! ```

pub mod config;
pub mod data;
pub mod tensor;
pub mod weighting;

// Re-export commonly used items
pub use config::DatasetConfig;
pub use data::{Batch, BatchLoader, Dataset, Partition, Task, TensorStreamDataset};
pub use tensor::Tensor;
pub use weighting::LocalizedErrorFn;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes that cannot be decoded as a tensor record.
    #[error("malformed tensor record: {0}")]
    Malformed(String),

    /// Record-level corruption attributed to one input stream.
    #[error("{partition} stream: malformed tensor record: {reason}")]
    MalformedRecord { partition: Partition, reason: String },

    /// Data and label records must pair up, so a stream's record count has
    /// to be even.
    #[error("{partition} stream holds {count} tensor records, which cannot pair data with labels")]
    OddRecordCount { partition: Partition, count: usize },

    /// The stream ended mid-fill, after the counting pass promised more
    /// records: the source changed between the two passes.
    #[error("{partition} stream ended after {got} records but the counting pass saw {expected}")]
    TruncatedStream {
        partition: Partition,
        expected: usize,
        got: usize,
    },

    #[error("dataset contains no samples")]
    EmptyDataset,

    /// A batch copy failed for an in-range index, indicating mismatched
    /// destination geometry.
    #[error("sample copy failed for {partition} index {index}")]
    SampleCopy { partition: Partition, index: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

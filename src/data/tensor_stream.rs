/// Two-pass streaming dataset loader for paired tensor records
///
/// A dataset source is a stream of serialized tensors in which data and
/// label records alternate: record 2i is the input for logical sample i and
/// record 2i+1 is its label. Loading runs in two passes over each stream:
/// the first counts records so storage can be allocated exactly, the second
/// decodes them into place. No incremental growth, no reallocation.
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::config::DatasetConfig;
use crate::tensor::Tensor;
use crate::weighting::LocalizedErrorFn;
use crate::{DatasetError, Result};

use super::{Dataset, Partition, Task};

/// A byte source of tensor records: anything readable and seekable.
pub trait RecordStream: Read + Seek {}

impl<T: Read + Seek + ?Sized> RecordStream for T {}

/// Count tensor records from the stream's current position.
///
/// Decoding stops at the zero-element sentinel record or at clean stream
/// exhaustion, whichever comes first; the returned count excludes the
/// sentinel. Bytes that cannot be decoded as a record are a fatal
/// [`DatasetError::Malformed`], never a soft count-stop. The stream is left
/// positioned past the last record examined; callers rewind before
/// re-reading.
pub fn count_records<R: Read + ?Sized>(stream: &mut R) -> Result<usize> {
    let mut count = 0;
    loop {
        match Tensor::deserialize(stream) {
            Ok(None) => break,
            Ok(Some(tensor)) if tensor.elements() == 0 => break,
            Ok(Some(_)) => count += 1,
            Err(DatasetError::Malformed(reason)) => {
                return Err(DatasetError::Malformed(format!("record {count}: {reason}")))
            }
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

fn count_partition<R: Read + ?Sized>(stream: &mut R, partition: Partition) -> Result<usize> {
    count_records(stream).map_err(|e| match e {
        DatasetError::Malformed(reason) => DatasetError::MalformedRecord { partition, reason },
        other => other,
    })
}

/// Decode the next record during the fill pass, where the counting pass has
/// already promised it exists. Running out of records here means the stream
/// changed between passes.
fn next_record<R: Read + ?Sized>(
    stream: &mut R,
    partition: Partition,
    expected: usize,
    got: usize,
) -> Result<Tensor> {
    match Tensor::deserialize(stream) {
        Ok(Some(tensor)) if tensor.elements() > 0 => Ok(tensor),
        Ok(_) => Err(DatasetError::TruncatedStream {
            partition,
            expected,
            got,
        }),
        Err(DatasetError::Malformed(reason)) => Err(DatasetError::MalformedRecord {
            partition,
            reason: format!("record {got}: {reason}"),
        }),
        Err(e) => Err(e),
    }
}

/// Dataset decoded from two tensor record streams.
///
/// Owns every decoded tensor plus the derived weight table; immutable after
/// construction. Training samples occupy store indices `[0, T/2)` and
/// testing samples `[T/2, N)`. The boundary is fixed by load order, so
/// testing lookups are a single offset, not an index table.
#[derive(Debug)]
pub struct TensorStreamDataset {
    data: Vec<Tensor>,
    labels: Vec<Tensor>,
    training_records: usize,
    testing_records: usize,
    classes: usize,
    class_names: Vec<String>,
    input_maps: usize,
    label_maps: usize,
    error_cache: Tensor,
}

impl TensorStreamDataset {
    /// Load a dataset from its two record streams.
    ///
    /// Each stream is read twice: a counting pass from the current position
    /// to the sentinel or end of stream, then, after a rewind to offset 0,
    /// a decoding pass that fills the exact-size store. Callers must
    /// guarantee the underlying bytes do not change between the passes.
    ///
    /// Fatal conditions: malformed records, an odd record count in either
    /// stream (a data record without its label, or vice versa), a stream
    /// that ends before the records the counting pass saw, and a dataset
    /// with no samples at all.
    pub fn new<R, S>(
        training: &mut R,
        testing: &mut S,
        classes: usize,
        class_names: Vec<String>,
        error_function: LocalizedErrorFn,
    ) -> Result<Self>
    where
        R: Read + Seek + ?Sized,
        S: Read + Seek + ?Sized,
    {
        // Pass 1: count records so the store can be allocated exactly.
        let training_records = count_partition(training, Partition::Training)?;
        log::debug!("{} training samples", training_records / 2);
        if training_records % 2 != 0 {
            return Err(DatasetError::OddRecordCount {
                partition: Partition::Training,
                count: training_records,
            });
        }

        let testing_records = count_partition(testing, Partition::Testing)?;
        log::debug!("{} testing samples", testing_records / 2);
        if testing_records % 2 != 0 {
            return Err(DatasetError::OddRecordCount {
                partition: Partition::Testing,
                count: testing_records,
            });
        }

        let total = (training_records + testing_records) / 2;
        if total == 0 {
            return Err(DatasetError::EmptyDataset);
        }

        // Pass 2 re-reads the same bytes from the start.
        training.rewind()?;
        testing.rewind()?;

        let mut data = Vec::with_capacity(total);
        let mut labels = Vec::with_capacity(total);
        for t in 0..training_records / 2 {
            data.push(next_record(training, Partition::Training, training_records, 2 * t)?);
            labels.push(next_record(training, Partition::Training, training_records, 2 * t + 1)?);
        }
        for t in 0..testing_records / 2 {
            data.push(next_record(testing, Partition::Testing, testing_records, 2 * t)?);
            labels.push(next_record(testing, Partition::Testing, testing_records, 2 * t + 1)?);
        }

        // Geometry is taken from the first sample and assumed uniform.
        let input_maps = data[0].maps();
        let label_maps = labels[0].maps();
        let width = data[0].width();
        let height = data[0].height();

        // The weight table is shared by every sample, evaluated exactly once.
        let mut error_cache = Tensor::new(1, 1, height, width);
        for y in 0..height {
            for x in 0..width {
                error_cache.set(x, y, 0, 0, error_function(x, y));
            }
        }

        Ok(Self {
            data,
            labels,
            training_records,
            testing_records,
            classes,
            class_names,
            input_maps,
            label_maps,
            error_cache,
        })
    }

    /// Build a dataset from a parsed configuration, opening the tensor
    /// files it names. A partition without a configured file stays empty.
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        log::debug!("loading dataset with {} classes", config.classes);
        let mut training = open_stream(config.training.as_deref())?;
        let mut testing = open_stream(config.testing.as_deref())?;
        Self::new(
            &mut *training,
            &mut *testing,
            config.classes,
            config.class_names.clone(),
            config.error_function(),
        )
    }

    /// Parse a configuration file and load the dataset it describes.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config = DatasetConfig::parse(BufReader::new(file))?;
        Self::from_config(&config)
    }

    fn copy_store_sample(
        &self,
        store_index: usize,
        data: &mut Tensor,
        label: &mut Tensor,
        weight: &mut Tensor,
        slot: usize,
    ) -> bool {
        let mut ok = true;
        ok &= Tensor::copy_sample(&self.data[store_index], 0, data, slot);
        ok &= Tensor::copy_sample(&self.labels[store_index], 0, label, slot);
        ok &= Tensor::copy_sample(&self.error_cache, 0, weight, slot);
        ok
    }
}

fn open_stream(path: Option<&Path>) -> Result<Box<dyn RecordStream>> {
    match path {
        Some(p) => Ok(Box::new(BufReader::new(File::open(p)?))),
        None => Ok(Box::new(Cursor::new(Vec::new()))),
    }
}

impl Dataset for TensorStreamDataset {
    fn task(&self) -> Task {
        Task::SemanticSegmentation
    }

    fn width(&self) -> usize {
        self.data[0].width()
    }

    fn height(&self) -> usize {
        self.data[0].height()
    }

    fn input_maps(&self) -> usize {
        self.input_maps
    }

    fn label_maps(&self) -> usize {
        self.label_maps
    }

    fn classes(&self) -> usize {
        self.classes
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn training_samples(&self) -> usize {
        self.training_records / 2
    }

    fn testing_samples(&self) -> usize {
        self.testing_records / 2
    }

    fn copy_training_sample(
        &self,
        data: &mut Tensor,
        label: &mut Tensor,
        weight: &mut Tensor,
        slot: usize,
        index: usize,
    ) -> bool {
        if index >= self.training_records / 2 {
            return false;
        }
        self.copy_store_sample(index, data, label, weight, slot)
    }

    fn copy_testing_sample(
        &self,
        data: &mut Tensor,
        label: &mut Tensor,
        weight: &mut Tensor,
        slot: usize,
        index: usize,
    ) -> bool {
        if index >= self.testing_records / 2 {
            return false;
        }
        let store_index = self.training_records / 2 + index;
        self.copy_store_sample(store_index, data, label, weight, slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weighting::default_localized_error;

    const MAPS: usize = 2;
    const LABEL_MAPS: usize = 1;
    const H: usize = 4;
    const W: usize = 6;

    fn data_record(value: f32) -> Tensor {
        Tensor::filled(1, MAPS, H, W, value)
    }

    fn label_record(value: f32) -> Tensor {
        Tensor::filled(1, LABEL_MAPS, H, W, value)
    }

    fn stream_of(tensors: &[Tensor]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for tensor in tensors {
            tensor.serialize(&mut bytes).unwrap();
        }
        Cursor::new(bytes)
    }

    fn empty_stream() -> Cursor<Vec<u8>> {
        Cursor::new(Vec::new())
    }

    /// One training pair per value in `train`, one testing pair per value
    /// in `test`; data records carry the value, labels carry value + 0.5.
    fn dataset_of(train: &[f32], test: &[f32]) -> TensorStreamDataset {
        let pairs = |values: &[f32]| {
            values
                .iter()
                .flat_map(|&v| [data_record(v), label_record(v + 0.5)])
                .collect::<Vec<_>>()
        };
        let mut training = stream_of(&pairs(train));
        let mut testing = stream_of(&pairs(test));
        TensorStreamDataset::new(
            &mut training,
            &mut testing,
            2,
            vec!["road".to_string(), "background".to_string()],
            default_localized_error,
        )
        .unwrap()
    }

    fn dest_tensors() -> (Tensor, Tensor, Tensor) {
        (
            Tensor::new(1, MAPS, H, W),
            Tensor::new(1, LABEL_MAPS, H, W),
            Tensor::new(1, 1, H, W),
        )
    }

    #[test]
    fn test_count_stops_at_sentinel_and_ignores_trailing_bytes() {
        let mut bytes = Vec::new();
        data_record(1.0).serialize(&mut bytes).unwrap();
        data_record(2.0).serialize(&mut bytes).unwrap();
        Tensor::empty().serialize(&mut bytes).unwrap();
        bytes.extend_from_slice(b"trailing garbage after the sentinel");

        let mut stream = Cursor::new(bytes);
        assert_eq!(count_records(&mut stream).unwrap(), 2);
    }

    #[test]
    fn test_count_runs_to_clean_eof() {
        let mut stream = stream_of(&[data_record(1.0), label_record(1.5)]);
        assert_eq!(count_records(&mut stream).unwrap(), 2);
    }

    #[test]
    fn test_recount_after_rewind_matches() {
        let mut stream = stream_of(&[data_record(1.0), label_record(1.5)]);
        let first = count_records(&mut stream).unwrap();
        stream.rewind().unwrap();
        assert_eq!(count_records(&mut stream).unwrap(), first);
    }

    #[test]
    fn test_odd_training_count_is_fatal() {
        let mut training = stream_of(&[data_record(1.0), label_record(1.5), data_record(2.0)]);
        let mut testing = empty_stream();
        let err = TensorStreamDataset::new(
            &mut training,
            &mut testing,
            0,
            Vec::new(),
            default_localized_error,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::OddRecordCount {
                partition: Partition::Training,
                count: 3,
            }
        ));
    }

    #[test]
    fn test_odd_testing_count_is_fatal() {
        let mut training = stream_of(&[data_record(1.0), label_record(1.5)]);
        let mut testing = stream_of(&[data_record(9.0)]);
        let err = TensorStreamDataset::new(
            &mut training,
            &mut testing,
            0,
            Vec::new(),
            default_localized_error,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::OddRecordCount {
                partition: Partition::Testing,
                count: 1,
            }
        ));
    }

    #[test]
    fn test_malformed_stream_is_fatal() {
        let mut training = Cursor::new(vec![0xFFu8; 40]);
        let mut testing = empty_stream();
        let err = TensorStreamDataset::new(
            &mut training,
            &mut testing,
            0,
            Vec::new(),
            default_localized_error,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::MalformedRecord {
                partition: Partition::Training,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        let mut training = empty_stream();
        let mut testing = empty_stream();
        let err = TensorStreamDataset::new(
            &mut training,
            &mut testing,
            0,
            Vec::new(),
            default_localized_error,
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::EmptyDataset));
    }

    #[test]
    fn test_single_pair_without_testing() {
        let dataset = dataset_of(&[1.0], &[]);

        assert_eq!(dataset.training_samples(), 1);
        assert_eq!(dataset.testing_samples(), 0);
        assert!(!dataset.supports_testing());
        assert_eq!(dataset.width(), W);
        assert_eq!(dataset.height(), H);
        assert_eq!(dataset.input_maps(), MAPS);
        assert_eq!(dataset.label_maps(), LABEL_MAPS);
        assert_eq!(dataset.classes(), 2);
        assert_eq!(dataset.class_names(), ["road", "background"]);
        assert_eq!(dataset.task(), Task::SemanticSegmentation);

        let (mut data, mut label, mut weight) = dest_tensors();
        assert!(!dataset.copy_testing_sample(&mut data, &mut label, &mut weight, 0, 0));
        assert!(dataset.copy_training_sample(&mut data, &mut label, &mut weight, 0, 0));
        assert_eq!(data.get(0, 0, 0, 0), 1.0);
        assert_eq!(label.get(0, 0, 0, 0), 1.5);
    }

    #[test]
    fn test_partition_offset_and_encounter_order() {
        let dataset = dataset_of(&[10.0, 20.0], &[30.0]);

        assert_eq!(dataset.training_samples(), 2);
        assert_eq!(dataset.testing_samples(), 1);
        assert!(dataset.supports_testing());

        let (mut data, mut label, mut weight) = dest_tensors();
        for (index, expected) in [(0, 10.0), (1, 20.0)] {
            assert!(dataset.copy_training_sample(&mut data, &mut label, &mut weight, 0, index));
            assert_eq!(data.get(2, 1, 0, 0), expected);
            assert_eq!(label.get(2, 1, 0, 0), expected + 0.5);
        }

        // testing logical index 0 lives past both training pairs
        assert!(dataset.copy_testing_sample(&mut data, &mut label, &mut weight, 0, 0));
        assert_eq!(data.get(0, 0, 0, 0), 30.0);
        assert_eq!(label.get(0, 0, 0, 0), 30.5);
    }

    #[test]
    fn test_out_of_range_index_fails_without_copying() {
        let dataset = dataset_of(&[1.0], &[2.0]);
        let (mut data, mut label, mut weight) = dest_tensors();

        assert!(!dataset.copy_training_sample(&mut data, &mut label, &mut weight, 0, 1));
        assert!(!dataset.copy_testing_sample(&mut data, &mut label, &mut weight, 0, 1));
        // destinations stay untouched
        assert_eq!(data.get(0, 0, 0, 0), 0.0);
        assert_eq!(label.get(0, 0, 0, 0), 0.0);
        assert_eq!(weight.get(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn test_geometry_mismatch_reports_failure() {
        let dataset = dataset_of(&[1.0], &[]);
        let mut data = Tensor::new(1, MAPS, H, W + 1);
        let mut label = Tensor::new(1, LABEL_MAPS, H, W + 1);
        let mut weight = Tensor::new(1, 1, H, W + 1);

        assert!(!dataset.copy_training_sample(&mut data, &mut label, &mut weight, 0, 0));
    }

    #[test]
    fn test_default_weight_cache_is_uniform_and_stable() {
        let dataset = dataset_of(&[1.0, 2.0], &[]);
        let (mut data, mut label, mut first) = dest_tensors();
        assert!(dataset.copy_training_sample(&mut data, &mut label, &mut first, 0, 0));

        for y in 0..H {
            for x in 0..W {
                assert_eq!(first.get(x, y, 0, 0), 1.0);
            }
        }

        let mut second = Tensor::new(1, 1, H, W);
        assert!(dataset.copy_training_sample(&mut data, &mut label, &mut second, 0, 1));
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_weight_function_fills_cache() {
        fn coordinate_weight(x: usize, y: usize) -> f32 {
            (x + 10 * y) as f32
        }

        let mut training = stream_of(&[data_record(1.0), label_record(1.5)]);
        let mut testing = empty_stream();
        let dataset = TensorStreamDataset::new(
            &mut training,
            &mut testing,
            0,
            Vec::new(),
            coordinate_weight,
        )
        .unwrap();

        let (mut data, mut label, mut weight) = dest_tensors();
        assert!(dataset.copy_training_sample(&mut data, &mut label, &mut weight, 0, 0));
        assert_eq!(weight.get(0, 0, 0, 0), 0.0);
        assert_eq!(weight.get(3, 0, 0, 0), 3.0);
        assert_eq!(weight.get(2, 3, 0, 0), 32.0);
    }

    #[test]
    fn test_from_config_file_loads_named_streams() {
        let dir = std::env::temp_dir().join(format!("tensor_stream_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let training_path = dir.join("train.tensors");
        let testing_path = dir.join("test.tensors");
        let set_path = dir.join("dataset.set");

        let pair = |v: f32| [data_record(v), label_record(v + 0.5)];
        std::fs::write(&training_path, stream_of(&pair(1.0)).into_inner()).unwrap();
        std::fs::write(&testing_path, stream_of(&pair(2.0)).into_inner()).unwrap();
        std::fs::write(
            &set_path,
            format!(
                "classes=1\nroad\ntraining={}\ntesting={}\n",
                training_path.display(),
                testing_path.display()
            ),
        )
        .unwrap();

        let dataset = TensorStreamDataset::from_config_file(&set_path).unwrap();
        assert_eq!(dataset.training_samples(), 1);
        assert_eq!(dataset.testing_samples(), 1);
        assert_eq!(dataset.class_names(), ["road"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_config_without_testing_file() {
        let dir = std::env::temp_dir().join(format!("tensor_stream_notest_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let training_path = dir.join("train.tensors");
        std::fs::write(
            &training_path,
            stream_of(&[data_record(1.0), label_record(1.5)]).into_inner(),
        )
        .unwrap();

        let config = DatasetConfig {
            training: Some(training_path),
            ..DatasetConfig::default()
        };
        let dataset = TensorStreamDataset::from_config(&config).unwrap();
        assert_eq!(dataset.training_samples(), 1);
        assert!(!dataset.supports_testing());

        std::fs::remove_dir_all(&dir).ok();
    }
}

use std::time::{Duration, Instant};

use comms::ObjectStore;
use log::info;
use ndarray::{Array1, Array2, s};

use super::{Preprocess, Preprocessed};
use crate::error::Result;

/// How a trailing partial batch is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// The partial batch is skipped.
    Floor,
    /// The partial batch is included.
    Ceil,
}

/// One slice of the training data, in placeholder feed order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Vec<Array2<f32>>,
    pub outputs: Vec<Array2<f32>>,
    /// One weight per sample, always 1.
    pub weights: Array1<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// The training data of one worker, held in memory.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    inputs: Vec<Array2<f32>>,
    outputs: Vec<Array2<f32>>,
    train_size: usize,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `Dataset` from preprocessed arrays.
    ///
    /// # Errors
    /// `WorkerErr::Preprocess` if an array doesn't have `train_size` rows.
    pub fn from_preprocessed(data: Preprocessed) -> Result<Self> {
        data.validate()?;

        Ok(Self {
            inputs: data.inputs,
            outputs: data.outputs,
            train_size: data.train_size,
        })
    }

    /// Fetches every chunk, runs the preprocessing hook over them and keeps the result.
    ///
    /// # Arguments
    /// * `store` - Where the chunks live.
    /// * `bucket` - The bucket holding the chunks.
    /// * `keys` - The chunk keys assigned to this worker.
    /// * `hook` - Turns the raw chunks into arrays.
    ///
    /// # Returns
    /// How long reading and preprocessing took.
    pub async fn read_data(
        &mut self,
        store: &dyn ObjectStore,
        bucket: &str,
        keys: &[String],
        hook: &dyn Preprocess,
    ) -> Result<Duration> {
        let start = Instant::now();
        info!("{} training file(s) present", keys.len());

        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            objects.push(store.get(bucket, key).await?);
        }

        *self = Self::from_preprocessed(hook.preprocess(keys, objects)?)?;
        Ok(start.elapsed())
    }

    pub fn train_size(&self) -> usize {
        self.train_size
    }

    /// Batch `i` of size `batch_size`: rows `[i * batch_size, (i + 1) * batch_size)`
    /// clamped to the data. Past the end every slice is empty.
    pub fn give_next(&self, batch_size: usize, i: usize) -> Batch {
        let start = i.saturating_mul(batch_size).min(self.train_size);
        let end = i
            .saturating_add(1)
            .saturating_mul(batch_size)
            .min(self.train_size);

        let rows = |arrays: &[Array2<f32>]| {
            arrays
                .iter()
                .map(|array| array.slice(s![start..end, ..]).to_owned())
                .collect()
        };

        Batch {
            inputs: rows(&self.inputs),
            outputs: rows(&self.outputs),
            weights: Array1::ones(end - start),
        }
    }

    /// `train_size / batch_size` without rounding.
    pub fn batch_ratio(&self, batch_size: usize) -> f64 {
        self.train_size as f64 / batch_size as f64
    }

    pub fn num_batches(&self, batch_size: usize, rounding: Rounding) -> usize {
        if batch_size == 0 {
            return 0;
        }

        match rounding {
            Rounding::Floor => self.train_size / batch_size,
            Rounding::Ceil => self.train_size.div_ceil(batch_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use comms::LocalStore;

    use super::*;
    use crate::data::SequenceLabelCsv;

    fn dataset(rows: usize) -> Dataset {
        let inputs = Array2::from_shape_fn((rows, 2), |(r, c)| (r * 2 + c) as f32);
        let outputs = Array2::from_shape_fn((rows, 1), |(r, _)| (r % 2) as f32);

        Dataset::from_preprocessed(Preprocessed {
            inputs: vec![inputs],
            outputs: vec![outputs],
            train_size: rows,
        })
        .unwrap()
    }

    #[test]
    fn last_batch_is_shorter() {
        let data = dataset(10);

        let first = data.give_next(4, 0);
        assert_eq!(first.len(), 4);
        assert_eq!(first.inputs[0].row(0).to_vec(), [0., 1.]);

        let last = data.give_next(4, 2);
        assert_eq!(last.len(), 2);
        assert_eq!(last.inputs[0].dim(), (2, 2));
        assert_eq!(last.outputs[0].dim(), (2, 1));
        assert_eq!(last.inputs[0].row(1).to_vec(), [18., 19.]);
        assert!(last.weights.iter().all(|&w| w == 1.));
    }

    #[test]
    fn out_of_range_is_empty() {
        let data = dataset(10);

        for i in [3, 10, usize::MAX] {
            let batch = data.give_next(4, i);
            assert!(batch.is_empty());
            assert_eq!(batch.inputs[0].nrows(), 0);
            assert_eq!(batch.outputs[0].nrows(), 0);
        }
    }

    #[test]
    fn floor_and_ceil_batch_counts() {
        let data = dataset(10);
        assert_eq!(data.num_batches(4, Rounding::Floor), 2);
        assert_eq!(data.num_batches(4, Rounding::Ceil), 3);
        assert_eq!(data.num_batches(5, Rounding::Floor), 2);
        assert_eq!(data.num_batches(5, Rounding::Ceil), 2);
        assert_eq!(data.batch_ratio(4), 2.5);
    }

    #[test]
    fn ceil_sees_every_sample_once() {
        let data = dataset(10);
        let seen: usize = (0..data.num_batches(3, Rounding::Ceil))
            .map(|i| data.give_next(3, i).len())
            .sum();
        assert_eq!(seen, 10);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let result = Dataset::from_preprocessed(Preprocessed {
            inputs: vec![Array2::zeros((3, 2))],
            outputs: vec![Array2::zeros((2, 1))],
            train_size: 3,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_data_fetches_assigned_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store
            .put("bucket", "rnnData/a.csv", b"x1,y\n1 2,1\n3 4,0\n")
            .await
            .unwrap();
        store
            .put("bucket", "rnnData/b.csv", b"x1,y\n5 6,1\n")
            .await
            .unwrap();

        let keys = vec!["rnnData/a.csv".to_string(), "rnnData/b.csv".to_string()];
        let mut data = Dataset::new();
        data.read_data(&store, "bucket", &keys, &SequenceLabelCsv)
            .await
            .unwrap();

        assert_eq!(data.train_size(), 3);
        assert_eq!(data.give_next(2, 1).inputs[0].row(0).to_vec(), [5., 6.]);
    }

    #[tokio::test]
    async fn missing_chunk_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let mut data = Dataset::new();
        let result = data
            .read_data(&store, "bucket", &["nope.csv".to_string()], &SequenceLabelCsv)
            .await;
        assert!(result.is_err());
    }
}

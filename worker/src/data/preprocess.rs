use log::info;
use ndarray::Array2;
use serde::Deserialize;

use crate::error::{Result, WorkerErr};

/// The arrays a preprocessing hook hands to the trainer.
///
/// Every array holds one row per training sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub inputs: Vec<Array2<f32>>,
    pub outputs: Vec<Array2<f32>>,
    pub train_size: usize,
}

impl Preprocessed {
    /// Checks every array has `train_size` rows.
    pub fn validate(&self) -> Result<()> {
        let arrays = self.inputs.iter().chain(&self.outputs);
        for (i, array) in arrays.enumerate() {
            if array.nrows() != self.train_size {
                return Err(WorkerErr::Preprocess(format!(
                    "array {i} has {} rows, expected train_size {}",
                    array.nrows(),
                    self.train_size
                )));
            }
        }

        Ok(())
    }
}

/// Turns the raw chunk objects of a worker into training arrays.
pub trait Preprocess: Send + Sync {
    /// # Arguments
    /// * `keys` - The chunk keys, in the order given to the trainer.
    /// * `objects` - The raw bytes of every chunk, in the same order.
    fn preprocess(&self, keys: &[String], objects: Vec<Vec<u8>>) -> Result<Preprocessed>;
}

/// Reads CSV chunks with a header holding an `x1` column of space separated
/// floats and an integer `y` label column.
///
/// Chunks are concatenated in key order; inputs are one `(rows, sequence)` array
/// and outputs one `(rows, 1)` array.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceLabelCsv;

#[derive(Deserialize)]
struct Row {
    x1: String,
    y: i64,
}

impl Preprocess for SequenceLabelCsv {
    fn preprocess(&self, keys: &[String], objects: Vec<Vec<u8>>) -> Result<Preprocessed> {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        let mut width = None;

        for (key, object) in keys.iter().zip(&objects) {
            info!("reading key {key}");
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_reader(object.as_slice());

            for (line, row) in reader.deserialize::<Row>().enumerate() {
                let row = row.map_err(|e| WorkerErr::Preprocess(format!("{key}: {e}")))?;
                let sequence = parse_sequence(&row.x1)
                    .map_err(|e| WorkerErr::Preprocess(format!("{key} row {line}: {e}")))?;

                let expected = *width.get_or_insert(sequence.len());
                if sequence.len() != expected {
                    return Err(WorkerErr::Preprocess(format!(
                        "{key} row {line}: sequence of length {}, expected {expected}",
                        sequence.len()
                    )));
                }

                features.extend(sequence);
                labels.push(row.y as f32);
            }
        }

        let train_size = labels.len();
        let width = width.unwrap_or(0);
        let shape_err = |e: ndarray::ShapeError| WorkerErr::Preprocess(e.to_string());

        let inputs = Array2::from_shape_vec((train_size, width), features).map_err(shape_err)?;
        let outputs = Array2::from_shape_vec((train_size, 1), labels).map_err(shape_err)?;
        info!("training size is {train_size}");

        Ok(Preprocessed {
            inputs: vec![inputs],
            outputs: vec![outputs],
            train_size,
        })
    }
}

fn parse_sequence(field: &str) -> std::result::Result<Vec<f32>, std::num::ParseFloatError> {
    field.split_whitespace().map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("rnnData/{i}.csv")).collect()
    }

    #[test]
    fn concatenates_chunks_in_order() {
        let objects = vec![
            b"x1,y\n0.1 0.2 0.3,1\n0.4 0.5 0.6,0\n".to_vec(),
            b"y,x1\n1,0.7 0.8 0.9\n".to_vec(),
        ];

        let pre = SequenceLabelCsv.preprocess(&keys(2), objects).unwrap();
        assert_eq!(pre.train_size, 3);
        assert_eq!(pre.inputs[0].dim(), (3, 3));
        assert_eq!(pre.inputs[0][[2, 0]], 0.7);
        assert_eq!(pre.outputs[0].column(0).to_vec(), [1., 0., 1.]);
        pre.validate().unwrap();
    }

    #[test]
    fn unequal_sequences_are_rejected() {
        let objects = vec![b"x1,y\n0.1 0.2,1\n0.3,0\n".to_vec()];
        let err = SequenceLabelCsv.preprocess(&keys(1), objects).unwrap_err();
        assert!(matches!(err, WorkerErr::Preprocess(_)));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let objects = vec![b"x1,y\n0.1 abc,1\n".to_vec()];
        assert!(SequenceLabelCsv.preprocess(&keys(1), objects).is_err());

        let objects = vec![b"x1,y\n0.1,one\n".to_vec()];
        assert!(SequenceLabelCsv.preprocess(&keys(1), objects).is_err());
    }

    #[test]
    fn no_rows_is_an_empty_dataset() {
        let pre = SequenceLabelCsv.preprocess(&[], Vec::new()).unwrap();
        assert_eq!(pre.train_size, 0);
        assert_eq!(pre.inputs[0].dim(), (0, 0));
    }

    #[test]
    fn validate_catches_short_arrays() {
        let pre = Preprocessed {
            inputs: vec![Array2::zeros((4, 2))],
            outputs: vec![Array2::zeros((3, 1))],
            train_size: 4,
        };
        assert!(matches!(pre.validate(), Err(WorkerErr::Preprocess(_))));
    }
}

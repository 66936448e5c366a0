mod dataset;
mod preprocess;

pub use dataset::{Batch, Dataset, Rounding};
pub use preprocess::{Preprocess, Preprocessed, SequenceLabelCsv};

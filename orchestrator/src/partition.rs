use std::ops::Range;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// How data chunks are split over workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Every worker gets `floor(N / W)` chunks; the `N mod W` trailing chunks are
    /// assigned to nobody and reported as dropped.
    Contiguous,
    /// Contiguous ranges covering every chunk whose sizes differ by at most one.
    #[default]
    Balanced,
}

/// The chunk ranges assigned to each worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    assignments: Vec<Range<usize>>,
    dropped: Range<usize>,
}

impl Partition {
    /// The range of chunk indices assigned to `worker`, empty if out of range.
    pub fn range(&self, worker: usize) -> Range<usize> {
        self.assignments.get(worker).cloned().unwrap_or(0..0)
    }

    pub fn assignments(&self) -> &[Range<usize>] {
        &self.assignments
    }

    /// Chunk indices no worker will read.
    pub fn dropped(&self) -> Range<usize> {
        self.dropped.clone()
    }

    /// The chunks assigned to `worker`.
    pub fn chunks_for<'a, T>(&self, chunks: &'a [T], worker: usize) -> &'a [T] {
        let range = self.range(worker);
        &chunks[range.start.min(chunks.len())..range.end.min(chunks.len())]
    }
}

/// Splits `chunks` chunk indices over `workers` workers.
///
/// Ranges are contiguous, in worker order and never overlap.
///
/// # Arguments
/// * `chunks` - The amount of chunks.
/// * `workers` - The amount of workers.
/// * `strategy` - How to deal with a remainder.
///
/// # Errors
/// `OrchestratorError::InvalidConfig` if there are no workers.
pub fn partition(chunks: usize, workers: usize, strategy: PartitionStrategy) -> Result<Partition> {
    if workers == 0 {
        return Err(OrchestratorError::InvalidConfig(
            "cannot partition chunks over zero workers".into(),
        ));
    }

    let per_worker = chunks / workers;
    let rem = chunks % workers;

    let assignments: Vec<_> = match strategy {
        PartitionStrategy::Contiguous => (0..workers)
            .map(|k| {
                let start = k * per_worker;
                let end = ((k + 1) * per_worker).min(chunks);
                start..end
            })
            .collect(),
        PartitionStrategy::Balanced => (0..workers)
            .map(|k| {
                let start = k * per_worker + k.min(rem);
                let extra = usize::from(k < rem);
                start..start + per_worker + extra
            })
            .collect(),
    };

    let covered = assignments.last().map_or(0, |r| r.end);
    let dropped = covered..chunks;

    if !dropped.is_empty() {
        warn!(
            chunks = chunks, workers = workers;
            "{} chunk(s) in {dropped:?} are not assigned to any worker", dropped.len()
        );
    }

    Ok(Partition {
        assignments,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_contiguous(p: &Partition) {
        let mut next = 0;
        for range in p.assignments() {
            assert_eq!(range.start, next, "ranges must be contiguous");
            assert!(range.end >= range.start);
            next = range.end;
        }
    }

    #[test]
    fn even_split_is_the_same_for_both_strategies() {
        for strategy in [PartitionStrategy::Contiguous, PartitionStrategy::Balanced] {
            let p = partition(8, 4, strategy).unwrap();
            assert_eq!(p.assignments(), &[0..2, 2..4, 4..6, 6..8]);
            assert!(p.dropped().is_empty());
            assert_contiguous(&p);
        }
    }

    #[test]
    fn contiguous_drops_the_remainder() {
        let p = partition(10, 4, PartitionStrategy::Contiguous).unwrap();
        assert_eq!(p.assignments(), &[0..2, 2..4, 4..6, 6..8]);
        assert_eq!(p.dropped(), 8..10);
        assert_contiguous(&p);
    }

    #[test]
    fn balanced_redistributes_the_remainder() {
        let p = partition(10, 4, PartitionStrategy::Balanced).unwrap();
        assert_eq!(p.assignments(), &[0..3, 3..6, 6..8, 8..10]);
        assert!(p.dropped().is_empty());
        assert_contiguous(&p);
    }

    #[test]
    fn balanced_covers_everything() {
        for chunks in 0..40 {
            for workers in 1..9 {
                let p = partition(chunks, workers, PartitionStrategy::Balanced).unwrap();
                assert_contiguous(&p);
                assert_eq!(p.assignments().last().unwrap().end, chunks);

                let sizes: Vec<_> = p.assignments().iter().map(|r| r.len()).collect();
                let max = sizes.iter().max().unwrap();
                let min = sizes.iter().min().unwrap();
                assert!(max - min <= 1, "{chunks}/{workers}: {sizes:?}");
            }
        }
    }

    #[test]
    fn fewer_chunks_than_workers() {
        let contiguous = partition(3, 4, PartitionStrategy::Contiguous).unwrap();
        assert!(contiguous.assignments().iter().all(|r| r.is_empty()));
        assert_eq!(contiguous.dropped(), 0..3);

        let balanced = partition(3, 4, PartitionStrategy::Balanced).unwrap();
        assert_eq!(balanced.assignments(), &[0..1, 1..2, 2..3, 3..3]);
    }

    #[test]
    fn zero_workers_is_an_error() {
        assert!(partition(4, 0, PartitionStrategy::Balanced).is_err());
    }

    #[test]
    fn chunks_for_slices_the_keys() {
        let keys = ["a", "b", "c", "d", "e"];
        let p = partition(keys.len(), 2, PartitionStrategy::Balanced).unwrap();
        assert_eq!(p.chunks_for(&keys, 0), &["a", "b", "c"]);
        assert_eq!(p.chunks_for(&keys, 1), &["d", "e"]);
        assert!(p.chunks_for(&keys, 5).is_empty());
    }
}

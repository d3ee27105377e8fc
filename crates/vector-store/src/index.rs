use crate::config::IndexKind;
use ndarray::{ArrayView1, ArrayView2};

/// Similarity scoring over the store's dense vector matrix.
///
/// Implementations return `(row, inner_product)` candidates; ordering,
/// tie-breaking and truncation are done by the store.
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// True when the index cannot restrict its scan to allowed rows and the
    /// store must filter (and over-fetch) after scoring.
    fn post_filter(&self) -> bool {
        false
    }

    /// Called after every write with the current matrix.
    fn refresh(&mut self, _vectors: ArrayView2<'_, f32>) {}

    /// Score rows against `query`. Pre-filtering indexes only return rows
    /// accepted by `allowed`; `limit` is a hint for approximate indexes.
    fn search(
        &self,
        vectors: ArrayView2<'_, f32>,
        query: ArrayView1<'_, f32>,
        allowed: &dyn Fn(usize) -> bool,
        limit: usize,
    ) -> Vec<(usize, f32)>;
}

/// Exact scan: one matrix-vector product over all rows.
#[derive(Debug, Default)]
pub struct BruteForceIndex;

impl VectorIndex for BruteForceIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::BruteForce
    }

    fn search(
        &self,
        vectors: ArrayView2<'_, f32>,
        query: ArrayView1<'_, f32>,
        allowed: &dyn Fn(usize) -> bool,
        _limit: usize,
    ) -> Vec<(usize, f32)> {
        if vectors.nrows() == 0 {
            return Vec::new();
        }
        let scores = vectors.dot(&query);
        scores
            .iter()
            .enumerate()
            .filter(|(row, _)| allowed(*row))
            .map(|(row, score)| (row, *score))
            .collect()
    }
}

pub fn build_index(kind: IndexKind) -> Box<dyn VectorIndex> {
    match kind {
        IndexKind::BruteForce => Box::new(BruteForceIndex),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn brute_force_scores_every_allowed_row() {
        let vectors = arr2(&[[1.0f32, 0.0, 0.0], [0.6, 0.8, 0.0], [0.0, 1.0, 0.0]]);
        let query = arr1(&[1.0f32, 0.0, 0.0]);
        let index = BruteForceIndex;

        let all = index.search(vectors.view(), query.view(), &|_| true, 10);
        assert_eq!(all.len(), 3);
        assert!((all[0].1 - 1.0).abs() < 1e-6);
        assert!((all[1].1 - 0.6).abs() < 1e-6);
        assert!(all[2].1.abs() < 1e-6);

        let odd_rows = index.search(vectors.view(), query.view(), &|row| row != 1, 10);
        let rows: Vec<usize> = odd_rows.iter().map(|(row, _)| *row).collect();
        assert_eq!(rows, vec![0, 2]);
        assert!(!index.post_filter());
    }

    #[test]
    fn empty_matrix_yields_nothing() {
        let vectors = ndarray::Array2::<f32>::zeros((0, 3));
        let query = arr1(&[1.0f32, 0.0, 0.0]);
        assert!(BruteForceIndex
            .search(vectors.view(), query.view(), &|_| true, 5)
            .is_empty());
    }
}

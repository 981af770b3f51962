//! Exact nearest-neighbour index over fixed-length vectors.
//!
//! Vectors are addressed by insertion position, which is also the position
//! of the matching record in the chunk store. Distance is squared L2; ties
//! go to the lower position.

use rayon::prelude::*;

use crate::error::{Error, Result};

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dimension: Option<usize>,
    /// Row-major: `data[position * dimension + i]`.
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dimensionality fixed by the first vector ever added.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        match self.dimension {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every vector matches the established (or first) dimension
    /// without modifying the index. Returns the dimension the batch has.
    pub fn check_batch<'a>(
        &self,
        vectors: impl IntoIterator<Item = &'a [f32]>,
    ) -> Result<Option<usize>> {
        let mut expected = self.dimension;
        for vector in vectors {
            match expected {
                Some(d) if d != vector.len() => {
                    return Err(Error::DimensionMismatch {
                        expected: d,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
                None if vector.is_empty() => {
                    return Err(Error::Embedding(
                        "cannot index an empty vector".into(),
                    ));
                }
                None => expected = Some(vector.len()),
            }
        }
        Ok(expected)
    }

    /// Append vectors in order. Either all are added or none are.
    pub fn add_batch(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let dimension = self.check_batch(vectors.iter().map(Vec::as_slice))?;
        if vectors.is_empty() {
            return Ok(());
        }
        self.dimension = dimension;
        self.data.reserve(vectors.len() * dimension.unwrap_or(0));
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let d = self.dimension?;
        self.data.get(position * d..(position + 1) * d)
    }

    /// Return up to `k` nearest positions in ascending distance order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let Some(d) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != d {
            return Err(Error::DimensionMismatch {
                expected: d,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .par_chunks_exact(d)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(vectors: &[&[f32]]) -> FlatIndex {
        let mut index = FlatIndex::new();
        let owned: Vec<Vec<f32>> = vectors.iter().map(|v| v.to_vec()).collect();
        index.add_batch(&owned).unwrap();
        index
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = FlatIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
    }

    #[test]
    fn nearest_first() {
        let index = index(&[&[0.0, 0.0], &[5.0, 5.0], &[1.0, 0.0]]);
        let hits = index.search(&[0.9, 0.0], 3).unwrap();

        let positions: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![2, 0, 1]);
        assert!((hits[0].distance - 0.01).abs() < 1e-6);
    }

    #[test]
    fn ties_go_to_first_inserted() {
        let index = index(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 0.0]]);
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn k_larger_than_index_returns_all() {
        let index = index(&[&[0.0], &[1.0]]);
        assert_eq!(index.search(&[0.0], 50).unwrap().len(), 2);
        assert!(index.search(&[0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn dimension_fixed_by_first_vector() {
        let mut index = index(&[&[0.0, 0.0, 0.0]]);
        assert_eq!(index.dimension(), Some(3));

        let err = index.add_batch(&[vec![1.0, 1.0]]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn mixed_batch_is_rejected_whole() {
        let mut index = FlatIndex::new();
        let err = index
            .add_batch(&[vec![1.0, 2.0], vec![1.0, 2.0, 3.0]])
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn query_dimension_must_match() {
        let index = index(&[&[0.0, 0.0]]);
        assert!(matches!(
            index.search(&[0.0], 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn vector_by_position() {
        let index = index(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert_eq!(index.vector(1), Some(&[3.0, 4.0][..]));
        assert_eq!(index.vector(2), None);
    }
}

//! Population-wide feature scaling.
//!
//! Distances in the cluster selector are computed in a normalized space so
//! that no single feature (residue count, say) dominates. Scaling statistics
//! are computed once over the whole store and shared read-only by every
//! stage of a run.

#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

use crate::domain::DomainStore;

/// Per-dimension scaling method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMethod {
    /// Z-score: (x - mean) / std, centers around 0
    #[default]
    ZScore,
    /// Min-max: (x - min) / (max - min), scales to [0, 1]
    MinMax,
}

/// Row-major matrix of normalized features, one row per store index.
///
/// Column 0 is the domain size; the remaining columns follow
/// [`DomainStore::feature_names`].
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    values: Vec<f64>,
    rows: usize,
    dims: usize,
    method: NormMethod,
}

impl FeatureMatrix {
    /// Normalize every domain of the store.
    pub fn from_store(store: &DomainStore, method: NormMethod) -> Self {
        let rows = store.len();
        let dims = store.num_features() + 1;

        let mut values = Vec::with_capacity(rows * dims);
        for domain in store.domains() {
            values.push(f64::from(domain.size()));
            values.extend_from_slice(domain.features());
        }

        for col in 0..dims {
            let column = (0..rows).map(|r| values[r * dims + col]);
            let (shift, scale) = match method {
                NormMethod::ZScore => zscore_params(column),
                NormMethod::MinMax => min_max_params(column),
            };
            for r in 0..rows {
                let v = &mut values[r * dims + col];
                *v = if scale == 0.0 { 0.0 } else { (*v - shift) / scale };
            }
        }

        Self {
            values,
            rows,
            dims,
            method,
        }
    }

    /// Normalized row for a store index.
    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.dims..(index + 1) * self.dims]
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Scaling method used.
    pub fn method(&self) -> NormMethod {
        self.method
    }

    /// Centroid of the given rows.
    pub fn centroid(&self, indices: &[usize]) -> Vec<f64> {
        let mut centroid = vec![0.0; self.dims];
        if indices.is_empty() {
            return centroid;
        }
        for &i in indices {
            for (c, v) in centroid.iter_mut().zip(self.row(i)) {
                *c += v;
            }
        }
        let n = indices.len() as f64;
        for c in &mut centroid {
            *c /= n;
        }
        centroid
    }
}

/// Squared Euclidean distance.
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance.
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

fn zscore_params(column: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let count = column.clone().count();
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = column.clone().sum::<f64>() / count as f64;
    let variance = column.map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;
    (mean, variance.sqrt())
}

fn min_max_params(column: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in column {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        return (0.0, 0.0);
    }
    (min, max - min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{test_support::*, StabilityClass};

    #[test]
    fn test_zscore_columns_centered() {
        let store = population(50);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);

        assert_eq!(matrix.rows(), 50);
        assert_eq!(matrix.dims(), 5);
        for col in 0..matrix.dims() {
            let mean: f64 = (0..50).map(|r| matrix.row(r)[col]).sum::<f64>() / 50.0;
            assert!(mean.abs() < 1e-9, "column {col} mean {mean}");
        }
    }

    #[test]
    fn test_min_max_in_unit_interval() {
        let store = population(30);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::MinMax);
        for r in 0..matrix.rows() {
            for v in matrix.row(r) {
                assert!((0.0..=1.0).contains(v));
            }
        }
    }

    #[test]
    fn test_constant_column_becomes_zero() {
        let store = DomainStore::new(
            vec![
                domain("1aaaA00", (1, 10, 8, 10), [0.5; 4], StabilityClass::Stable),
                domain("1bbbA00", (1, 10, 8, 10), [0.5; 4], StabilityClass::Stable),
            ],
            FEATURES,
        )
        .expect("store");
        let matrix = FeatureMatrix::from_store(&store, NormMethod::ZScore);
        assert!(matrix.row(0).iter().all(|v| *v == 0.0));
        assert!(matrix.row(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_centroid_and_distance() {
        let store = population(4);
        let matrix = FeatureMatrix::from_store(&store, NormMethod::MinMax);
        let centroid = matrix.centroid(&[0, 1]);
        let expected: Vec<f64> = matrix
            .row(0)
            .iter()
            .zip(matrix.row(1))
            .map(|(a, b)| (a + b) / 2.0)
            .collect();
        assert!(distance(&centroid, &expected) < 1e-12);
        assert!(matrix.centroid(&[]).iter().all(|v| *v == 0.0));
        assert_eq!(squared_distance(&[0.0, 3.0], &[4.0, 0.0]), 25.0);
    }
}

use rayon::prelude::*;

use crate::{Error, GeoPoint, Result};

/// Rows above this size are worth farming out to the rayon pool.
const PARALLEL_ROW_THRESHOLD: usize = 64;

/// Square matrix of pairwise non-negative distances, flat row-major
/// storage.
#[derive(Clone, Debug)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Full pairwise haversine matrix over `points`.
    pub fn from_points(points: &[GeoPoint]) -> Self {
        let n = points.len();
        let row = |i: usize| -> Vec<f64> {
            (0..n)
                .map(|j| if i == j { 0.0 } else { points[i].dist(&points[j]) })
                .collect()
        };

        let data: Vec<f64> = if n >= PARALLEL_ROW_THRESHOLD {
            (0..n).into_par_iter().flat_map_iter(row).collect()
        } else {
            (0..n).flat_map(row).collect()
        };

        Self { n, data }
    }

    /// Build from explicit rows, validating shape and sign.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for row in &rows {
            if row.len() != n {
                return Err(Error::invalid_input(format!(
                    "distance matrix must be square: {n} rows but a row of {}",
                    row.len()
                )));
            }
            for &value in row {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::invalid_input(
                        "distance matrix entries must be finite and non-negative",
                    ));
                }
                data.push(value);
            }
        }
        Ok(Self { n, data })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    /// Sum of consecutive edges, no closing edge.
    pub fn open_tour_length(&self, tour: &[usize]) -> f64 {
        tour.windows(2).map(|w| self.get(w[0], w[1])).sum()
    }

    /// Sum of consecutive edges including the closing edge back to the
    /// first node.
    pub fn cyclic_tour_length(&self, tour: &[usize]) -> f64 {
        let n = tour.len();
        if n < 2 {
            return 0.0;
        }
        (0..n).map(|i| self.get(tour[i], tour[(i + 1) % n])).sum()
    }
}

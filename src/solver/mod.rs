//! Walking-tour ordering over a distance matrix.
//!
//! Three interchangeable strategies behind one entry point; all of them
//! return a permutation of `0..n` with the start point fixed at index 0.

mod approx;
mod exact;
pub mod matrix;
mod two_opt;

use serde::{Deserialize, Serialize};

pub use matrix::DistanceMatrix;

/// Largest instance the bitmask DP will attempt; above this the exact
/// strategy silently falls back to 2-opt.
pub const MAX_EXACT_NODES: usize = 20;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TourStrategy {
    /// Nearest-neighbor seed improved by 2-opt local search.
    #[default]
    TwoOpt,
    /// MST plus greedy odd-vertex matching, shortcut to a tour.
    Approximate,
    /// Bitmask dynamic programming, optimal up to [`MAX_EXACT_NODES`].
    Exact,
}

/// Order the matrix's indices into a short tour starting at index 0.
pub fn solve(matrix: &DistanceMatrix, strategy: TourStrategy) -> Vec<usize> {
    let n = matrix.n();
    match n {
        0 => return Vec::new(),
        1 => return vec![0],
        2 => return vec![0, 1],
        _ => {}
    }

    match strategy {
        TourStrategy::TwoOpt => two_opt::solve(matrix),
        TourStrategy::Approximate => approx::solve(matrix),
        TourStrategy::Exact if n > MAX_EXACT_NODES => {
            log::debug!("solver: exact fallback to 2-opt n={n} max={MAX_EXACT_NODES}");
            two_opt::solve(matrix)
        }
        TourStrategy::Exact => exact::solve(matrix),
    }
}

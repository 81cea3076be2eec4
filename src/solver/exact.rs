//! Exact tour by bitmask dynamic programming.
//!
//! `dp[mask][last]` is the cheapest way to visit exactly the vertices
//! in `mask`, starting at 0 and ending at `last`. O(n^2 * 2^n) time and
//! space; the dispatcher caps n at [`super::MAX_EXACT_NODES`].

use super::matrix::DistanceMatrix;

const UNREACHED: f64 = f64::MAX;
const NO_PARENT: i32 = -1;

pub(crate) fn solve(matrix: &DistanceMatrix) -> Vec<usize> {
    let n = matrix.n();
    debug_assert!((2..=super::MAX_EXACT_NODES).contains(&n));

    let masks = 1usize << n;
    let mut dp = vec![UNREACHED; masks * n];
    let mut parent = vec![NO_PARENT; masks * n];

    dp[n] = 0.0; // mask = 1 (just vertex 0), last = 0

    for mask in 1..masks {
        for last in 0..n {
            if mask & (1 << last) == 0 {
                continue;
            }
            let cost = dp[mask * n + last];
            if cost == UNREACHED {
                continue;
            }
            for next in 0..n {
                if mask & (1 << next) != 0 {
                    continue;
                }
                let new_mask = mask | (1 << next);
                let new_cost = cost + matrix.get(last, next);
                if new_cost < dp[new_mask * n + next] {
                    dp[new_mask * n + next] = new_cost;
                    parent[new_mask * n + next] = last as i32;
                }
            }
        }
    }

    // Close the cycle back to 0 over every possible final vertex.
    let full = masks - 1;
    let mut best_cost = UNREACHED;
    let mut last = 0usize;
    for i in 1..n {
        let cost = dp[full * n + i] + matrix.get(i, 0);
        if cost < best_cost {
            best_cost = cost;
            last = i;
        }
    }

    let mut tour = Vec::with_capacity(n);
    let mut mask = full;
    let mut current = last as i32;
    while current != NO_PARENT {
        tour.push(current as usize);
        let prev = parent[mask * n + current as usize];
        if prev != NO_PARENT {
            mask ^= 1 << current;
        }
        current = prev;
    }
    tour.reverse();

    log::debug!("solver.exact: complete n={n} tour_len={best_cost:.0}");
    tour
}

#[cfg(test)]
mod tests {
    use super::solve;
    use crate::solver::matrix::DistanceMatrix;

    /// Brute-force minimum cyclic tour over all permutations fixing 0.
    fn brute_force_min(matrix: &DistanceMatrix) -> f64 {
        fn permute(rest: &mut Vec<usize>, chosen: &mut Vec<usize>, matrix: &DistanceMatrix, best: &mut f64) {
            if rest.is_empty() {
                *best = best.min(matrix.cyclic_tour_length(chosen));
                return;
            }
            for i in 0..rest.len() {
                let v = rest.remove(i);
                chosen.push(v);
                permute(rest, chosen, matrix, best);
                chosen.pop();
                rest.insert(i, v);
            }
        }

        let n = matrix.n();
        let mut rest: Vec<usize> = (1..n).collect();
        let mut chosen = vec![0];
        let mut best = f64::MAX;
        permute(&mut rest, &mut chosen, matrix, &mut best);
        best
    }

    fn random_symmetric(n: usize, seed: u64) -> DistanceMatrix {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = rng.gen_range(1.0..100.0);
                rows[i][j] = d;
                rows[j][i] = d;
            }
        }
        DistanceMatrix::from_rows(rows).expect("square matrix")
    }

    #[test]
    fn dp_matches_brute_force_for_small_instances() {
        for n in 3..=8 {
            let matrix = random_symmetric(n, 42 + n as u64);
            let tour = solve(&matrix);
            let dp_len = matrix.cyclic_tour_length(&tour);
            let optimal = brute_force_min(&matrix);
            assert!(
                (dp_len - optimal).abs() < 1e-9,
                "n={n}: dp={dp_len} brute={optimal}"
            );
        }
    }

    #[test]
    fn dp_returns_a_permutation_starting_at_zero() {
        let matrix = random_symmetric(10, 7);
        let tour = solve(&matrix);
        assert_eq!(tour[0], 0);
        let mut sorted = tour.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }
}

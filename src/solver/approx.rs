//! Approximate tour: MST + greedy matching.
//!
//! Kruskal spanning tree, greedy nearest-pair matching over the odd-
//! degree vertices (NOT a minimum-weight perfect matching, so the
//! classical 1.5x bound does not hold), Eulerian circuit, shortcut.

use super::matrix::DistanceMatrix;

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // Path halving.
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) -> bool {
        let (px, py) = (self.find(x), self.find(y));
        if px == py {
            return false;
        }
        match self.rank[px].cmp(&self.rank[py]) {
            std::cmp::Ordering::Less => self.parent[px] = py,
            std::cmp::Ordering::Greater => self.parent[py] = px,
            std::cmp::Ordering::Equal => {
                self.parent[py] = px;
                self.rank[px] += 1;
            }
        }
        true
    }
}

fn minimum_spanning_tree(matrix: &DistanceMatrix) -> Vec<(usize, usize)> {
    let n = matrix.n();
    let mut edges: Vec<(usize, usize, f64)> = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            edges.push((i, j, matrix.get(i, j)));
        }
    }
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut set = DisjointSet::new(n);
    let mut mst = Vec::with_capacity(n - 1);
    for (from, to, _) in edges {
        if set.union(from, to) {
            mst.push((from, to));
            if mst.len() == n - 1 {
                break;
            }
        }
    }
    mst
}

fn odd_degree_vertices(mst: &[(usize, usize)], n: usize) -> Vec<usize> {
    let mut degree = vec![0usize; n];
    for &(from, to) in mst {
        degree[from] += 1;
        degree[to] += 1;
    }
    (0..n).filter(|&v| degree[v] % 2 == 1).collect()
}

/// Greedy nearest-pair matching: repeatedly take the globally shortest
/// edge between two unmatched odd vertices.
fn greedy_matching(matrix: &DistanceMatrix, vertices: &[usize]) -> Vec<(usize, usize)> {
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for (idx, &a) in vertices.iter().enumerate() {
        for &b in &vertices[idx + 1..] {
            edges.push((a, b, matrix.get(a, b)));
        }
    }
    edges.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut matching = Vec::with_capacity(vertices.len() / 2);
    let mut used = vec![false; matrix.n()];
    for (from, to, _) in edges {
        if !used[from] && !used[to] {
            matching.push((from, to));
            used[from] = true;
            used[to] = true;
        }
    }
    matching
}

/// Stack-based Hierholzer circuit from vertex 0 over the MST+matching
/// multigraph. Emits vertices when the stack backtracks, then reverses.
fn eulerian_circuit(mut adjacency: Vec<Vec<usize>>) -> Vec<usize> {
    let mut circuit = Vec::new();
    let mut stack = vec![0usize];

    while let Some(&v) = stack.last() {
        if let Some(&u) = adjacency[v].first() {
            adjacency[v].remove(0);
            if let Some(pos) = adjacency[u].iter().position(|&w| w == v) {
                adjacency[u].remove(pos);
            }
            stack.push(u);
        } else {
            circuit.push(v);
            stack.pop();
        }
    }

    circuit.reverse();
    circuit
}

fn shortcut_to_hamiltonian(circuit: &[usize], n: usize) -> Vec<usize> {
    let mut seen = vec![false; n];
    let mut tour = Vec::with_capacity(n);
    for &v in circuit {
        if !seen[v] {
            seen[v] = true;
            tour.push(v);
        }
    }
    tour
}

pub(crate) fn solve(matrix: &DistanceMatrix) -> Vec<usize> {
    let n = matrix.n();
    let mst = minimum_spanning_tree(matrix);
    let odd = odd_degree_vertices(&mst, n);
    let matching = greedy_matching(matrix, &odd);

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in mst.iter().chain(matching.iter()) {
        adjacency[from].push(to);
        adjacency[to].push(from);
    }

    let circuit = eulerian_circuit(adjacency);
    let tour = shortcut_to_hamiltonian(&circuit, n);

    log::debug!(
        "solver.approx: complete n={n} mst_edges={} matched={} tour_len={:.0}",
        mst.len(),
        matching.len(),
        matrix.cyclic_tour_length(&tour)
    );
    tour
}

// SPDX-License-Identifier: Apache-2.0
//! Clique selection on the pairwise-security graph.
//!
//! A clique of k locked signals satisfies k(k-1)/2 pairwise-security
//! constraints, while the same k signals spread over several disjoint
//! cliques satisfy strictly fewer. The optimizer therefore partitions its
//! selection into vertex-disjoint cliques and maximizes the total number
//! of satisfied constraints under a cardinality cap.

/// Undirected simple graph over locking candidates.
/// No self-loops, no multi-edges; adjacency lists are sorted.
#[derive(Debug, Clone)]
pub struct PairwiseGraph {
    pub num_vertices: usize,
    adjacency: Vec<Vec<u32>>,
}

impl PairwiseGraph {
    pub fn from_edges(
        num_vertices: usize,
        edges: impl IntoIterator<Item = (u32, u32)>,
    ) -> PairwiseGraph {
        let mut adjacency = vec![Vec::new(); num_vertices];
        for (a, b) in edges {
            if a == b {
                continue;
            }
            adjacency[a as usize].push(b);
            adjacency[b as usize].push(a);
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }
        PairwiseGraph {
            num_vertices,
            adjacency,
        }
    }

    pub fn num_edges(&self) -> usize {
        self.adjacency.iter().map(|l| l.len()).sum::<usize>() / 2
    }

    pub fn degree(&self, v: usize) -> usize {
        self.adjacency[v].len()
    }

    pub fn neighbors(&self, v: usize) -> &[u32] {
        &self.adjacency[v]
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.adjacency[a].binary_search(&(b as u32)).is_ok()
    }

    /// Whether `vertices` induces a complete subgraph.
    pub fn is_clique(&self, vertices: &[u32]) -> bool {
        vertices.iter().enumerate().all(|(i, &a)| {
            vertices[i + 1..]
                .iter()
                .all(|&b| self.has_edge(a as usize, b as usize))
        })
    }
}

/// An ordered list of vertex-disjoint cliques.
#[derive(Debug, Clone, Default)]
pub struct CliqueSolution {
    pub cliques: Vec<Vec<u32>>,
}

impl CliqueSolution {
    /// Total satisfied pairwise constraints: sum of k(k-1)/2 per clique.
    pub fn value(&self) -> u64 {
        self.cliques
            .iter()
            .map(|c| (c.len() * c.len().saturating_sub(1) / 2) as u64)
            .sum()
    }

    /// Selected vertices, clique by clique.
    pub fn selected(&self) -> Vec<u32> {
        self.cliques.iter().flatten().copied().collect()
    }

    pub fn num_selected(&self) -> usize {
        self.cliques.iter().map(|c| c.len()).sum()
    }

    /// The largest clique of the solution (ties: earliest emitted).
    pub fn largest_clique(&self) -> Option<&Vec<u32>> {
        let mut best: Option<&Vec<u32>> = None;
        for c in &self.cliques {
            if best.map_or(true, |b| c.len() > b.len()) {
                best = Some(c);
            }
        }
        best
    }
}

/// Greedy optimizer: repeatedly extract a maximal clique from the
/// remaining induced subgraph, truncated at the remaining budget, then
/// fill any leftover budget with singletons in index order. All ties
/// break toward the lower vertex index for determinism.
pub fn optimize_greedy(graph: &PairwiseGraph, cap: usize) -> CliqueSolution {
    let mut alive = vec![true; graph.num_vertices];
    let mut solution = CliqueSolution::default();
    let mut budget = cap.min(graph.num_vertices);

    while budget >= 2 {
        let clique = greedy_maximal_clique(graph, &alive, budget);
        if clique.len() < 2 {
            break;
        }
        for &v in &clique {
            alive[v as usize] = false;
        }
        budget -= clique.len();
        solution.cliques.push(clique);
    }

    // Isolated or leftover vertices contribute no constraints; they are
    // emitted as singletons only to fill the budget.
    for v in 0..graph.num_vertices {
        if budget == 0 {
            break;
        }
        if alive[v] {
            alive[v] = false;
            budget -= 1;
            solution.cliques.push(vec![v as u32]);
        }
    }
    solution
}

/// Expand one maximal clique among the `alive` vertices, capped at
/// `limit` vertices. Seeds at the alive vertex of maximum alive-degree
/// and grows by the candidate with the most common neighbors.
fn greedy_maximal_clique(graph: &PairwiseGraph, alive: &[bool], limit: usize) -> Vec<u32> {
    let alive_degree = |v: usize| {
        graph
            .neighbors(v)
            .iter()
            .filter(|&&n| alive[n as usize])
            .count()
    };
    let mut seed = None;
    let mut seed_degree = 0;
    for v in 0..graph.num_vertices {
        if !alive[v] {
            continue;
        }
        let d = alive_degree(v);
        if seed.is_none() || d > seed_degree {
            seed = Some(v);
            seed_degree = d;
        }
    }
    let Some(seed) = seed else {
        return Vec::new();
    };

    let mut clique = vec![seed as u32];
    let mut pool: Vec<u32> = graph
        .neighbors(seed)
        .iter()
        .copied()
        .filter(|&n| alive[n as usize])
        .collect();
    while !pool.is_empty() && clique.len() < limit {
        // Pick the pool vertex with the most neighbors still in the pool.
        let mut best = 0;
        let mut best_score = 0;
        for (i, &v) in pool.iter().enumerate() {
            let score = pool
                .iter()
                .filter(|&&o| o != v && graph.has_edge(v as usize, o as usize))
                .count();
            if i == 0 || score > best_score {
                best = i;
                best_score = score;
            }
        }
        let v = pool[best];
        clique.push(v);
        pool.retain(|&o| o != v && graph.has_edge(v as usize, o as usize));
    }
    clique.sort_unstable();
    clique
}

/// Exhaustive variant: extract a true maximum clique at every step
/// instead of a greedy maximal one. Exponential in the worst case, only
/// intended for small graphs.
pub fn optimize_exhaustive(graph: &PairwiseGraph, cap: usize) -> CliqueSolution {
    let mut alive = vec![true; graph.num_vertices];
    let mut solution = CliqueSolution::default();
    let mut budget = cap.min(graph.num_vertices);

    while budget >= 2 {
        let clique = maximum_clique(graph, &alive, budget);
        if clique.len() < 2 {
            break;
        }
        for &v in &clique {
            alive[v as usize] = false;
        }
        budget -= clique.len();
        solution.cliques.push(clique);
    }
    for v in 0..graph.num_vertices {
        if budget == 0 {
            break;
        }
        if alive[v] {
            alive[v] = false;
            budget -= 1;
            solution.cliques.push(vec![v as u32]);
        }
    }
    solution
}

/// Branch-and-bound maximum clique over the alive vertices, truncated at
/// `limit`. The first maximum found in ascending vertex order wins.
fn maximum_clique(graph: &PairwiseGraph, alive: &[bool], limit: usize) -> Vec<u32> {
    let vertices: Vec<u32> = (0..graph.num_vertices as u32)
        .filter(|&v| alive[v as usize])
        .collect();
    let mut best = Vec::new();
    let mut current = Vec::new();
    extend_clique(graph, &vertices, limit, &mut current, &mut best);
    best.sort_unstable();
    best
}

fn extend_clique(
    graph: &PairwiseGraph,
    pool: &[u32],
    limit: usize,
    current: &mut Vec<u32>,
    best: &mut Vec<u32>,
) {
    if current.len() > best.len() {
        *best = current.clone();
    }
    if current.len() == limit || current.len() + pool.len() <= best.len() {
        return;
    }
    for (i, &v) in pool.iter().enumerate() {
        if current.len() + (pool.len() - i) <= best.len() {
            break;
        }
        let narrowed: Vec<u32> = pool[i + 1..]
            .iter()
            .copied()
            .filter(|&o| graph.has_edge(v as usize, o as usize))
            .collect();
        current.push(v);
        extend_clique(graph, &narrowed, limit, current, best);
        current.pop();
    }
}

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::matrix::{Matrix, cosine_similarity};

/// Default minimum cosine similarity for two tracks to be connected.
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Directed edge as (source, destination) node indices.
pub type Edge = (usize, usize);

/// Undirected, unweighted similarity graph stored as a directed edge list
/// that always contains both directions of every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityGraph {
    pub num_nodes: usize,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub avg_degree: f64,
    pub isolated: usize,
}

impl SimilarityGraph {
    /// Wrap an existing edge list (e.g. one read back from disk).
    pub fn from_edges(num_nodes: usize, edges: Vec<Edge>) -> Self {
        Self { num_nodes, edges }
    }

    /// Incoming neighbors per node: `adj[i]` lists every `j` with an edge j → i.
    pub fn incoming(&self) -> Vec<Vec<usize>> {
        let mut adj = vec![Vec::new(); self.num_nodes];
        for &(src, dst) in &self.edges {
            adj[dst].push(src);
        }
        adj
    }

    /// Largest endpoint index that doesn't fit in `num_nodes`, if any.
    pub fn out_of_range_node(&self) -> Option<usize> {
        self.edges
            .iter()
            .flat_map(|&(s, d)| [s, d])
            .filter(|&v| v >= self.num_nodes)
            .max()
    }

    pub fn stats(&self) -> GraphStats {
        let mut degree = vec![0usize; self.num_nodes];
        for &(src, _) in &self.edges {
            if let Some(d) = degree.get_mut(src) {
                *d += 1;
            }
        }
        GraphStats {
            nodes: self.num_nodes,
            edges: self.edges.len(),
            avg_degree: if self.num_nodes == 0 {
                0.0
            } else {
                self.edges.len() as f64 / self.num_nodes as f64
            },
            isolated: degree.iter().filter(|&&d| d == 0).count(),
        }
    }
}

/// Threshold the pairwise cosine similarity of `features` into an edge list.
///
/// Rows are scanned with `i` ascending and `j > i` ascending; each match emits
/// `(i, j)` followed by `(j, i)`. Rows are computed on a pool of `jobs`
/// workers, but the output order never depends on the worker count.
pub fn build_graph(
    features: &Matrix,
    threshold: f64,
    jobs: usize,
) -> Result<SimilarityGraph, rayon::ThreadPoolBuildError> {
    let n = features.rows();

    let pb = ProgressBar::new(n as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tracks ({eta} remaining)")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    if n < 64 {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;

    let per_row: Vec<Vec<usize>> = pool.install(|| {
        (0..n)
            .into_par_iter()
            .map(|i| {
                let a = features.row(i);
                let matches = ((i + 1)..n)
                    .filter(|&j| cosine_similarity(a, features.row(j)) >= threshold)
                    .collect();
                pb.inc(1);
                matches
            })
            .collect()
    });

    pb.finish_and_clear();

    let mut edges = Vec::with_capacity(per_row.iter().map(|m| m.len() * 2).sum());
    for (i, matches) in per_row.into_iter().enumerate() {
        for j in matches {
            edges.push((i, j));
            edges.push((j, i));
        }
    }

    let graph = SimilarityGraph { num_nodes: n, edges };
    let stats = graph.stats();
    log::info!(
        "Graph built: {} nodes, {} edges, avg degree {:.2}, {} isolated",
        stats.nodes,
        stats.edges,
        stats.avg_degree,
        stats.isolated
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn matrix(rows: &[[f32; 4]]) -> Matrix {
        Matrix::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
    }

    fn mixed() -> Matrix {
        matrix(&[
            [1.0, 0.0, 0.0, 0.0],
            [0.9, 0.1, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.95, 0.05, 0.0],
            [-1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    #[test]
    fn test_identical_vectors_fully_connected() {
        let m = matrix(&[[0.3, -1.2, 0.7, 0.1]; 3]);
        let g = build_graph(&m, DEFAULT_THRESHOLD, 1).unwrap();
        assert_eq!(g.edges, vec![(0, 1), (1, 0), (0, 2), (2, 0), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_symmetric_without_self_loops() {
        let g = build_graph(&mixed(), DEFAULT_THRESHOLD, 2).unwrap();
        let set: HashSet<_> = g.edges.iter().copied().collect();
        for &(s, d) in &g.edges {
            assert_ne!(s, d);
            assert!(set.contains(&(d, s)), "missing reverse of ({s}, {d})");
        }
        assert!(set.contains(&(0, 1)));
        assert!(set.contains(&(2, 3)));
        assert!(!set.contains(&(0, 4)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // probe the boundary with the computed similarity itself
        let m = matrix(&[[1.0, 0.0, 0.0, 0.0], [0.6, 0.8, 0.0, 0.0]]);
        let sim = cosine_similarity(m.row(0), m.row(1));
        assert_eq!(build_graph(&m, sim, 1).unwrap().edges.len(), 2);
        assert!(build_graph(&m, sim + 1e-9, 1).unwrap().edges.is_empty());
    }

    #[test]
    fn test_worker_count_does_not_change_order() {
        let one = build_graph(&mixed(), 0.5, 1).unwrap();
        let four = build_graph(&mixed(), 0.5, 4).unwrap();
        assert_eq!(one, four);
    }

    #[test]
    fn test_stats_and_isolated_nodes() {
        let g = build_graph(&mixed(), DEFAULT_THRESHOLD, 1).unwrap();
        let stats = g.stats();
        assert_eq!(stats.nodes, 6);
        assert_eq!(stats.edges, 4);
        assert_eq!(stats.isolated, 2);
        assert!((stats.avg_degree - 4.0 / 6.0).abs() < 1e-12);
        assert!(g.incoming()[5].is_empty());
        assert_eq!(g.incoming()[0], vec![1]);
    }

    #[test]
    fn test_out_of_range_node() {
        let g = SimilarityGraph::from_edges(3, vec![(0, 1), (1, 0), (2, 7)]);
        assert_eq!(g.out_of_range_node(), Some(7));
        let ok = SimilarityGraph::from_edges(3, vec![(0, 2), (2, 0)]);
        assert_eq!(ok.out_of_range_node(), None);
    }

    #[test]
    fn test_empty_features() {
        let g = build_graph(&Matrix::zeros(0, 4), DEFAULT_THRESHOLD, 1).unwrap();
        assert_eq!(g.num_nodes, 0);
        assert!(g.edges.is_empty());
        assert_eq!(g.stats().avg_degree, 0.0);
    }
}

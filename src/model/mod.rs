//! Two-layer GraphSAGE embedding model and its full-batch training loop.
//!
//! ```text
//! features [N, D] ──► SAGE(D → 32) ──► ReLU ──► SAGE(32 → 64) ──► embeddings [N, 64]
//! ```
//!
//! Training is unsupervised: it minimizes the mean L2 norm of the output
//! rows. That objective pulls every embedding toward zero and carries no
//! contrastive signal; it is kept as-is, so callers should only rely on the
//! output being finite and correctly shaped.

pub mod adam;
pub mod sage;

use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::graph::SimilarityGraph;
use crate::matrix::Matrix;
use adam::Adam;
use sage::SageLayer;

pub const HIDDEN_DIM: usize = 32;
pub const EMBEDDING_DIM: usize = 64;
pub const DEFAULT_EPOCHS: usize = 100;
pub const DEFAULT_LEARNING_RATE: f32 = 0.01;
/// Training loss is logged every this many epochs.
const LOG_EVERY: usize = 20;

#[derive(Error, Debug, PartialEq)]
pub enum ModelError {
    #[error("graph/feature shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("cannot train on an empty graph")]
    EmptyGraph,
    #[error("non-finite {what} at epoch {epoch}")]
    NonFinite { what: &'static str, epoch: usize },
    #[error("weight initialization failed: {0}")]
    Init(String),
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// Weight init seed. `None` draws from OS entropy, so runs differ.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            seed: None,
        }
    }
}

pub struct TrainResult {
    pub embeddings: Matrix,
    /// Loss before each optimizer step, one entry per epoch.
    pub losses: Vec<f32>,
}

impl TrainResult {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// GraphSAGE with a ReLU between the two layers and a linear output.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSage {
    conv1: SageLayer,
    conv2: SageLayer,
}

/// Intermediate values of one forward pass, kept for backprop.
struct Trace {
    agg1: Matrix,
    pre_relu: Matrix,
    hidden: Matrix,
    agg2: Matrix,
    out: Matrix,
}

impl GraphSage {
    pub fn new(in_dim: usize, seed: Option<u64>) -> Result<Self, ModelError> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            conv1: SageLayer::new(in_dim, HIDDEN_DIM, &mut rng)?,
            conv2: SageLayer::new(HIDDEN_DIM, EMBEDDING_DIM, &mut rng)?,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.conv1.in_dim()
    }

    pub fn num_parameters(&self) -> usize {
        self.conv1.num_parameters() + self.conv2.num_parameters()
    }

    /// Embed every node. `incoming[i]` lists the sources of edges into `i`.
    pub fn forward(&self, x: &Matrix, incoming: &[Vec<usize>]) -> Matrix {
        self.trace(x, incoming).out
    }

    fn trace(&self, x: &Matrix, incoming: &[Vec<usize>]) -> Trace {
        let (pre_relu, agg1) = self.conv1.forward(x, incoming);
        let mut hidden = pre_relu.clone();
        for v in hidden.as_mut_slice() {
            *v = v.max(0.0);
        }
        let (out, agg2) = self.conv2.forward(&hidden, incoming);
        Trace {
            agg1,
            pre_relu,
            hidden,
            agg2,
            out,
        }
    }

    fn parameter_sizes(&self) -> Vec<usize> {
        [&self.conv1, &self.conv2]
            .iter()
            .flat_map(|l| [l.w_neigh.len(), l.bias.len(), l.w_self.len()])
            .collect()
    }

    /// One full-batch step: forward, loss, backward, Adam update.
    /// Returns the loss measured before the update.
    fn train_step(
        &mut self,
        x: &Matrix,
        incoming: &[Vec<usize>],
        optimizer: &mut Adam,
    ) -> f32 {
        let trace = self.trace(x, incoming);
        let (loss, grad_out) = mean_norm_loss(&trace.out);

        let (grads2, mut grad_hidden) =
            self.conv2.backward(&trace.hidden, &trace.agg2, incoming, &grad_out);
        for (g, &z) in grad_hidden
            .as_mut_slice()
            .iter_mut()
            .zip(trace.pre_relu.as_slice())
        {
            if z <= 0.0 {
                *g = 0.0;
            }
        }
        let (grads1, _) = self.conv1.backward(x, &trace.agg1, incoming, &grad_hidden);

        optimizer.step(
            &mut [
                self.conv1.w_neigh.as_mut_slice(),
                self.conv1.bias.as_mut_slice(),
                self.conv1.w_self.as_mut_slice(),
                self.conv2.w_neigh.as_mut_slice(),
                self.conv2.bias.as_mut_slice(),
                self.conv2.w_self.as_mut_slice(),
            ],
            &[
                grads1.w_neigh.as_slice(),
                grads1.bias.as_slice(),
                grads1.w_self.as_slice(),
                grads2.w_neigh.as_slice(),
                grads2.bias.as_slice(),
                grads2.w_self.as_slice(),
            ],
        );

        loss
    }
}

/// Mean over rows of the row L2 norm, plus its gradient w.r.t. the rows.
/// A zero row contributes zero gradient.
pub fn mean_norm_loss(out: &Matrix) -> (f32, Matrix) {
    let n = out.rows();
    let mut grad = Matrix::zeros(n, out.cols());
    if n == 0 {
        return (0.0, grad);
    }

    let mut total = 0.0_f64;
    for i in 0..n {
        let row = out.row(i);
        let norm = row.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        total += norm;
        if norm > 0.0 {
            let scale = (1.0 / (norm * n as f64)) as f32;
            for (g, v) in grad.row_mut(i).iter_mut().zip(row) {
                *g = v * scale;
            }
        }
    }

    ((total / n as f64) as f32, grad)
}

/// Check that the edge list only references rows of `features`.
pub fn validate_shapes(features: &Matrix, graph: &SimilarityGraph) -> Result<(), ModelError> {
    if features.rows() != graph.num_nodes {
        return Err(ModelError::ShapeMismatch(format!(
            "{} feature rows but graph has {} nodes",
            features.rows(),
            graph.num_nodes
        )));
    }
    if let Some(node) = graph.out_of_range_node() {
        return Err(ModelError::ShapeMismatch(format!(
            "edge references node {node}, only {} rows",
            features.rows()
        )));
    }
    Ok(())
}

/// Train a fresh model on the whole graph and return the final embeddings.
pub fn train_embeddings(
    features: &Matrix,
    graph: &SimilarityGraph,
    config: &TrainConfig,
) -> Result<TrainResult, ModelError> {
    validate_shapes(features, graph)?;
    if features.rows() == 0 {
        return Err(ModelError::EmptyGraph);
    }

    let incoming = graph.incoming();
    let mut model = GraphSage::new(features.cols(), config.seed)?;
    let mut optimizer = Adam::new(config.learning_rate, &model.parameter_sizes());

    log::info!(
        "Training GraphSAGE: {} nodes, {} edges, {} parameters, {} epochs (lr {})",
        features.rows(),
        graph.edges.len(),
        model.num_parameters(),
        config.epochs,
        config.learning_rate
    );

    let pb = ProgressBar::new(config.epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] epoch {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let mut losses = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        let loss = model.train_step(features, &incoming, &mut optimizer);
        if !loss.is_finite() {
            pb.abandon();
            return Err(ModelError::NonFinite {
                what: "loss",
                epoch,
            });
        }
        losses.push(loss);
        pb.set_message(format!("loss {loss:.4}"));
        pb.inc(1);

        if epoch % LOG_EVERY == 0 {
            log::info!("Epoch {epoch:03} | Loss: {loss:.4}");
        }
    }
    pb.finish_and_clear();
    log::debug!("Training finished after {} optimizer steps", optimizer.steps());

    let embeddings = model.forward(features, &incoming);
    if !embeddings.is_finite() {
        return Err(ModelError::NonFinite {
            what: "embedding",
            epoch: config.epochs,
        });
    }

    Ok(TrainResult { embeddings, losses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;

    fn features() -> Matrix {
        Matrix::from_rows(&[
            vec![1.2, -0.3, 0.5, -1.0],
            vec![1.0, -0.2, 0.6, -0.9],
            vec![-0.8, 1.1, -0.4, 0.2],
            vec![-1.0, 1.3, -0.2, 0.4],
            vec![0.1, -1.5, -1.4, 1.6],
            vec![-0.5, -0.4, 0.9, -0.3],
        ])
        .unwrap()
    }

    fn seeded(epochs: usize, seed: u64) -> TrainConfig {
        TrainConfig {
            epochs,
            seed: Some(seed),
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_embedding_shape_and_finite() {
        let x = features();
        let graph = build_graph(&x, 0.85, 1).unwrap();
        let result = train_embeddings(&x, &graph, &seeded(DEFAULT_EPOCHS, 1)).unwrap();
        assert_eq!(result.embeddings.rows(), 6);
        assert_eq!(result.embeddings.cols(), EMBEDDING_DIM);
        assert!(result.embeddings.is_finite());
        assert_eq!(result.losses.len(), DEFAULT_EPOCHS);
    }

    #[test]
    fn test_isolated_node_gets_finite_embedding() {
        let x = features();
        let graph = build_graph(&x, 0.85, 1).unwrap();
        let incoming = graph.incoming();
        let isolated = (0..6).find(|&i| incoming[i].is_empty()).unwrap();
        let result = train_embeddings(&x, &graph, &seeded(DEFAULT_EPOCHS, 2)).unwrap();
        assert!(result.embeddings.row(isolated).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_graph_without_edges() {
        let x = features();
        let graph = SimilarityGraph::from_edges(6, Vec::new());
        let result = train_embeddings(&x, &graph, &seeded(10, 3)).unwrap();
        assert!(result.embeddings.is_finite());
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let x = features();
        let graph = build_graph(&x, 0.85, 1).unwrap();
        let a = train_embeddings(&x, &graph, &seeded(20, 9)).unwrap();
        let b = train_embeddings(&x, &graph, &seeded(20, 9)).unwrap();
        let c = train_embeddings(&x, &graph, &seeded(20, 10)).unwrap();
        assert_eq!(a.embeddings, b.embeddings);
        assert_eq!(a.losses, b.losses);
        assert_ne!(a.embeddings, c.embeddings);
    }

    #[test]
    fn test_loss_goes_down() {
        let x = features();
        let graph = build_graph(&x, 0.85, 1).unwrap();
        let result = train_embeddings(&x, &graph, &seeded(DEFAULT_EPOCHS, 4)).unwrap();
        assert!(result.final_loss().unwrap() < result.losses[0]);
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let x = features();
        let graph = SimilarityGraph::from_edges(7, Vec::new());
        assert!(matches!(
            train_embeddings(&x, &graph, &seeded(1, 0)),
            Err(ModelError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_edge_out_of_range_rejected() {
        let x = features();
        let graph = SimilarityGraph::from_edges(6, vec![(0, 6), (6, 0)]);
        assert!(matches!(
            train_embeddings(&x, &graph, &seeded(1, 0)),
            Err(ModelError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_empty_graph_rejected() {
        let x = Matrix::zeros(0, 4);
        let graph = SimilarityGraph::from_edges(0, Vec::new());
        assert_eq!(
            train_embeddings(&x, &graph, &seeded(1, 0)).err(),
            Some(ModelError::EmptyGraph)
        );
    }

    #[test]
    fn test_mean_norm_loss() {
        let out = Matrix::from_rows(&[vec![3.0, 4.0], vec![0.0, 0.0]]).unwrap();
        let (loss, grad) = mean_norm_loss(&out);
        assert!((loss - 2.5).abs() < 1e-6);
        // d/dh ||h|| = h / ||h||, averaged over 2 rows
        assert!((grad.row(0)[0] - 0.3).abs() < 1e-6);
        assert!((grad.row(0)[1] - 0.4).abs() < 1e-6);
        assert_eq!(grad.row(1), &[0.0, 0.0]);
    }

    #[test]
    fn test_forward_shape_untrained() {
        let model = GraphSage::new(4, Some(0)).unwrap();
        assert_eq!(model.in_dim(), 4);
        let x = features();
        let out = model.forward(&x, &vec![Vec::new(); 6]);
        assert_eq!((out.rows(), out.cols()), (6, EMBEDDING_DIM));
    }
}

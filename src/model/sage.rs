use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::ModelError;
use crate::matrix::Matrix;

/// One GraphSAGE layer with mean aggregation:
///
/// ```text
/// out_i = W_neigh · mean({x_j : j → i}) + b + W_self · x_i
/// ```
///
/// A node without incoming edges aggregates to the zero vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SageLayer {
    in_dim: usize,
    out_dim: usize,
    /// `out_dim × in_dim`, applied to the neighbor mean
    pub(crate) w_neigh: Vec<f32>,
    pub(crate) bias: Vec<f32>,
    /// `out_dim × in_dim`, applied to the node's own input
    pub(crate) w_self: Vec<f32>,
}

/// Gradients for every parameter of a [`SageLayer`], same layout.
#[derive(Debug, Clone)]
pub struct SageGrads {
    pub w_neigh: Vec<f32>,
    pub bias: Vec<f32>,
    pub w_self: Vec<f32>,
}

impl SageLayer {
    /// Weights and bias drawn from U(-1/√in_dim, 1/√in_dim).
    pub fn new<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> Result<Self, ModelError> {
        if in_dim == 0 || out_dim == 0 {
            return Err(ModelError::ShapeMismatch(format!(
                "layer dimensions must be non-zero, got {in_dim} → {out_dim}"
            )));
        }
        let bound = 1.0 / (in_dim as f32).sqrt();
        let dist = Uniform::new(-bound, bound).map_err(|e| ModelError::Init(e.to_string()))?;

        let w_neigh = (0..out_dim * in_dim).map(|_| dist.sample(rng)).collect();
        let bias = (0..out_dim).map(|_| dist.sample(rng)).collect();
        let w_self = (0..out_dim * in_dim).map(|_| dist.sample(rng)).collect();

        Ok(Self {
            in_dim,
            out_dim,
            w_neigh,
            bias,
            w_self,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn num_parameters(&self) -> usize {
        self.w_neigh.len() + self.bias.len() + self.w_self.len()
    }

    /// Forward pass. Returns the layer output and the neighbor means,
    /// which the backward pass needs.
    pub fn forward(&self, x: &Matrix, incoming: &[Vec<usize>]) -> (Matrix, Matrix) {
        let agg = mean_aggregate(x, incoming);
        let n = x.rows();
        let mut out = Matrix::zeros(n, self.out_dim);

        for i in 0..n {
            let xi = x.row(i);
            let ai = agg.row(i);
            let oi = out.row_mut(i);
            for o in 0..self.out_dim {
                let wn = &self.w_neigh[o * self.in_dim..(o + 1) * self.in_dim];
                let ws = &self.w_self[o * self.in_dim..(o + 1) * self.in_dim];
                let mut acc = self.bias[o];
                for k in 0..self.in_dim {
                    acc += wn[k] * ai[k] + ws[k] * xi[k];
                }
                oi[o] = acc;
            }
        }

        (out, agg)
    }

    /// Backward pass given `grad_out = dL/d(out)`.
    /// Returns parameter gradients and `dL/dx`.
    pub fn backward(
        &self,
        x: &Matrix,
        agg: &Matrix,
        incoming: &[Vec<usize>],
        grad_out: &Matrix,
    ) -> (SageGrads, Matrix) {
        let n = x.rows();
        let (in_dim, out_dim) = (self.in_dim, self.out_dim);

        let mut grads = SageGrads {
            w_neigh: vec![0.0; out_dim * in_dim],
            bias: vec![0.0; out_dim],
            w_self: vec![0.0; out_dim * in_dim],
        };
        let mut grad_x = Matrix::zeros(n, in_dim);
        let mut grad_agg = Matrix::zeros(n, in_dim);

        for i in 0..n {
            let gi = grad_out.row(i);
            let xi = x.row(i);
            let ai = agg.row(i);
            for o in 0..out_dim {
                let g = gi[o];
                if g == 0.0 {
                    continue;
                }
                grads.bias[o] += g;
                let row = o * in_dim..(o + 1) * in_dim;
                for (k, idx) in row.enumerate() {
                    grads.w_neigh[idx] += g * ai[k];
                    grads.w_self[idx] += g * xi[k];
                    grad_agg.row_mut(i)[k] += g * self.w_neigh[idx];
                    grad_x.row_mut(i)[k] += g * self.w_self[idx];
                }
            }
        }

        // Scatter the neighbor-mean gradient back to the sources
        for (dst, sources) in incoming.iter().enumerate() {
            if sources.is_empty() {
                continue;
            }
            let scale = 1.0 / sources.len() as f32;
            let gd: Vec<f32> = grad_agg.row(dst).iter().map(|v| v * scale).collect();
            for &src in sources {
                for (acc, g) in grad_x.row_mut(src).iter_mut().zip(&gd) {
                    *acc += g;
                }
            }
        }

        (grads, grad_x)
    }
}

/// Mean of the incoming neighbors' rows; zero for nodes without neighbors.
pub fn mean_aggregate(x: &Matrix, incoming: &[Vec<usize>]) -> Matrix {
    let mut agg = Matrix::zeros(x.rows(), x.cols());
    for (dst, sources) in incoming.iter().enumerate() {
        if sources.is_empty() {
            continue;
        }
        let row = agg.row_mut(dst);
        for &src in sources {
            for (acc, v) in row.iter_mut().zip(x.row(src)) {
                *acc += v;
            }
        }
        let count = sources.len() as f32;
        for v in row.iter_mut() {
            *v /= count;
        }
    }
    agg
}

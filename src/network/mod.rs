//! Feed-forward embedding network.
//!
//! A stack of dense layers mapping D-dimensional node vectors back into a
//! D-dimensional refined space:
//!
//! ```text
//! D → 1024 → 512 → 256 → D
//! ```
//!
//! Every hidden layer is followed by ReLU and dropout; the output layer is
//! linear. Rows are transformed independently.
//!
//! The network owns no optimization logic. [`EmbeddingNetwork::forward`]
//! returns a [`ForwardCache`], [`EmbeddingNetwork::backward`] turns an
//! output gradient into per-layer gradients, and [`Sgd`] applies them.

mod dense;
mod dropout;
mod optim;

pub use dense::{Dense, DenseGrad};
pub use dropout::Dropout;
pub use optim::Sgd;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Activations kept from a forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    /// Input to each layer.
    inputs: Vec<Array2<f32>>,
    /// Pre-ReLU output of each hidden layer.
    pre_activations: Vec<Array2<f32>>,
    /// Dropout mask applied after each hidden layer.
    masks: Vec<Array2<f32>>,
}

/// Dense → ReLU → Dropout stack with a linear output layer.
#[derive(Debug, Clone)]
pub struct EmbeddingNetwork {
    layers: Vec<Dense>,
    dropout: Dropout,
    rng: StdRng,
    training: bool,
}

impl EmbeddingNetwork {
    /// Build a `dim → hidden... → dim` network in training mode.
    pub fn new(dim: usize, hidden: &[usize], dropout: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let widths: Vec<usize> = std::iter::once(dim)
            .chain(hidden.iter().copied())
            .chain(std::iter::once(dim))
            .collect();
        let layers = widths
            .windows(2)
            .map(|w| Dense::new(w[0], w[1], &mut rng))
            .collect();

        Self {
            layers,
            dropout: Dropout::new(dropout),
            rng,
            training: true,
        }
    }

    /// Toggle dropout.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Whether dropout is active.
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Input (and output) width.
    pub fn dim(&self) -> usize {
        self.layers.first().map_or(0, Dense::fan_in)
    }

    /// The layers, input side first.
    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    /// Total parameter count.
    pub fn parameters(&self) -> usize {
        self.layers.iter().map(|l| l.weight.len() + l.bias.len()).sum()
    }

    /// Forward pass that records what backward needs. Dropout is drawn
    /// fresh when in training mode.
    pub fn forward(&mut self, input: ArrayView2<'_, f32>) -> Result<(Array2<f32>, ForwardCache)> {
        self.check_input(input)?;
        let n_hidden = self.layers.len() - 1;
        let mut cache = ForwardCache {
            inputs: Vec::with_capacity(self.layers.len()),
            pre_activations: Vec::with_capacity(n_hidden),
            masks: Vec::with_capacity(n_hidden),
        };

        let mut h = input.to_owned();
        for layer in &self.layers[..n_hidden] {
            let z = layer.forward(h.view());
            cache.inputs.push(h);
            let a = z.mapv(relu);
            let mask = if self.training {
                self.dropout.mask(a.dim(), &mut self.rng)
            } else {
                Array2::ones(a.dim())
            };
            h = Dropout::apply(a.view(), &mask);
            cache.pre_activations.push(z);
            cache.masks.push(mask);
        }

        let out = self.layers[n_hidden].forward(h.view());
        cache.inputs.push(h);
        Ok((out, cache))
    }

    /// Evaluation-mode forward pass: no dropout, nothing cached.
    pub fn embed(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_input(input)?;
        let last = self.layers.len() - 1;
        let mut h = input.to_owned();
        for (l, layer) in self.layers.iter().enumerate() {
            h = layer.forward(h.view());
            if l < last {
                h.mapv_inplace(relu);
            }
        }
        Ok(h)
    }

    /// Per-layer gradients given dL/d(output). Fails if any gradient is not finite.
    pub fn backward(&self, cache: &ForwardCache, grad_output: ArrayView2<'_, f32>) -> Result<Vec<DenseGrad>> {
        if cache.inputs.len() != self.layers.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("cache for {} layers", self.layers.len()),
                actual: cache.inputs.len().to_string(),
            });
        }

        let mut grads = Vec::with_capacity(self.layers.len());
        let mut g = grad_output.to_owned();
        for l in (0..self.layers.len()).rev() {
            let (grad, grad_in) = self.layers[l].backward(cache.inputs[l].view(), g.view());
            if !grad.is_finite() {
                return Err(Error::unstable(
                    "parameter gradients",
                    format!("layer {l} gradient contains NaN or Inf"),
                ));
            }
            grads.push(grad);
            if l > 0 {
                let pre = &cache.pre_activations[l - 1];
                g = grad_in * &cache.masks[l - 1];
                g.zip_mut_with(pre, |gv, &z| {
                    if z <= 0.0 {
                        *gv = 0.0;
                    }
                });
            }
        }
        grads.reverse();
        Ok(grads)
    }

    fn check_input(&self, input: ArrayView2<'_, f32>) -> Result<()> {
        if input.ncols() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                found: input.ncols(),
            });
        }
        Ok(())
    }
}

fn relu(x: f32) -> f32 {
    x.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rows: usize, dim: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, dim), |(i, j)| ((i * dim + j) as f32 * 0.37).sin())
    }

    #[test]
    fn test_shapes_and_parameter_count() {
        let mut net = EmbeddingNetwork::new(6, &[8, 4], 0.05, 1);
        assert_eq!(net.layers().len(), 3);
        assert_eq!(net.parameters(), 6 * 8 + 8 + 8 * 4 + 4 + 4 * 6 + 6);
        let (out, _) = net.forward(input(5, 6).view()).unwrap();
        assert_eq!(out.dim(), (5, 6));
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let mut net = EmbeddingNetwork::new(4, &[16], 0.5, 2);
        net.set_training(false);
        let x = input(3, 4);
        let (a, _) = net.forward(x.view()).unwrap();
        let (b, _) = net.forward(x.view()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, net.embed(x.view()).unwrap());
    }

    #[test]
    fn test_training_mode_dropout_varies() {
        let mut net = EmbeddingNetwork::new(4, &[64], 0.5, 2);
        let x = input(8, 4);
        let (a, _) = net.forward(x.view()).unwrap();
        let (b, _) = net.forward(x.view()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_dimension_mismatch() {
        let net = EmbeddingNetwork::new(4, &[8], 0.0, 0);
        assert!(matches!(
            net.embed(input(2, 5).view()),
            Err(Error::DimensionMismatch { expected: 4, found: 5 })
        ));
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut net = EmbeddingNetwork::new(3, &[5, 4], 0.0, 9);
        let x = input(4, 3);
        let target = Array2::from_shape_fn((4, 3), |(i, j)| (i as f32 - j as f32) * 0.1);

        // L = 0.5 * ||f(x) - t||², dL/dy = f(x) - t
        let loss = |n: &EmbeddingNetwork| {
            let y = n.embed(x.view()).unwrap();
            0.5 * (&y - &target).mapv(|v| v * v).sum()
        };
        let (y, cache) = net.forward(x.view()).unwrap();
        let grads = net.backward(&cache, (&y - &target).view()).unwrap();

        let h = 1e-3f32;
        for (l, (i, j)) in [(0, (1, 2)), (1, (3, 0)), (2, (2, 1))] {
            let base = loss(&net);
            net.layers_mut()[l].weight[[i, j]] += h;
            let fd = (loss(&net) - base) / h;
            net.layers_mut()[l].weight[[i, j]] -= h;
            let analytic = grads[l].weight[[i, j]];
            assert!(
                (fd - analytic).abs() < 1e-2 * (1.0 + analytic.abs()),
                "layer {l} w[{i},{j}]: fd {fd} vs analytic {analytic}"
            );
        }
    }
}

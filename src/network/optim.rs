//! Stochastic gradient descent with momentum.
//!
//! ```text
//! v ← μ v + g
//! θ ← θ - lr v
//! ```

use ndarray::{Array1, Array2};

use super::dense::DenseGrad;
use super::EmbeddingNetwork;
use crate::error::{Error, Result};

/// SGD with classical momentum; one velocity buffer per parameter tensor.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<(Array2<f32>, Array1<f32>)>,
}

impl Sgd {
    /// Create an optimizer shaped for `network`.
    pub fn new(network: &EmbeddingNetwork, learning_rate: f32, momentum: f32) -> Self {
        let velocity = network
            .layers()
            .iter()
            .map(|l| (Array2::zeros(l.weight.raw_dim()), Array1::zeros(l.bias.raw_dim())))
            .collect();
        Self {
            learning_rate,
            momentum,
            velocity,
        }
    }

    /// Apply one update. Gradients are consumed, so nothing accumulates across steps.
    pub fn step(&mut self, network: &mut EmbeddingNetwork, grads: Vec<DenseGrad>) -> Result<()> {
        if grads.len() != self.velocity.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} layer gradients", self.velocity.len()),
                actual: grads.len().to_string(),
            });
        }

        let (lr, mu) = (self.learning_rate, self.momentum);
        for ((layer, (vw, vb)), grad) in network
            .layers_mut()
            .iter_mut()
            .zip(self.velocity.iter_mut())
            .zip(grads)
        {
            vw.zip_mut_with(&grad.weight, |v, &g| *v = mu * *v + g);
            vb.zip_mut_with(&grad.bias, |v, &g| *v = mu * *v + g);
            layer.weight.scaled_add(-lr, &*vw);
            layer.bias.scaled_add(-lr, &*vb);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_momentum_accumulates() {
        let mut net = EmbeddingNetwork::new(2, &[], 0.0, 1);
        let before = net.layers()[0].weight.clone();
        let mut opt = Sgd::new(&net, 0.1, 0.5);

        let grad = || DenseGrad {
            weight: Array2::ones((2, 2)),
            bias: Array1::ones(2),
        };
        opt.step(&mut net, vec![grad()]).unwrap();
        opt.step(&mut net, vec![grad()]).unwrap();

        // v1 = 1, v2 = 1.5; total move = 0.1 * 2.5
        let moved = &before - &net.layers()[0].weight;
        assert!(moved.iter().all(|&d| (d - 0.25).abs() < 1e-6));
    }
}

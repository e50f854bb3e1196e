//! Fully connected layer `y = x W + b`.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;

/// Weights (in×out) and bias (out).
#[derive(Debug, Clone)]
pub struct Dense {
    pub(crate) weight: Array2<f32>,
    pub(crate) bias: Array1<f32>,
}

/// Gradients for one [`Dense`] layer.
#[derive(Debug, Clone)]
pub struct DenseGrad {
    /// dL/dW, in×out.
    pub weight: Array2<f32>,
    /// dL/db, out.
    pub bias: Array1<f32>,
}

impl Dense {
    /// Uniform init in `±1/sqrt(fan_in)` for both weights and bias.
    pub fn new(fan_in: usize, fan_out: usize, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        Self {
            weight: Array2::from_shape_fn((fan_in, fan_out), |_| rng.random_range(-bound..bound)),
            bias: Array1::from_shape_fn(fan_out, |_| rng.random_range(-bound..bound)),
        }
    }

    /// Input width.
    pub fn fan_in(&self) -> usize {
        self.weight.nrows()
    }

    /// Output width.
    pub fn fan_out(&self) -> usize {
        self.weight.ncols()
    }

    pub(crate) fn forward(&self, input: ArrayView2<'_, f32>) -> Array2<f32> {
        input.dot(&self.weight) + &self.bias
    }

    /// Parameter gradients and the gradient w.r.t. the layer input.
    pub(crate) fn backward(
        &self,
        input: ArrayView2<'_, f32>,
        grad_out: ArrayView2<'_, f32>,
    ) -> (DenseGrad, Array2<f32>) {
        let grad = DenseGrad {
            weight: input.t().dot(&grad_out),
            bias: grad_out.sum_axis(Axis(0)),
        };
        let grad_in = grad_out.dot(&self.weight.t());
        (grad, grad_in)
    }
}

impl DenseGrad {
    pub(crate) fn is_finite(&self) -> bool {
        self.weight.iter().chain(self.bias.iter()).all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_backward_matches_finite_difference() {
        let layer = Dense {
            weight: array![[0.5, -1.0], [2.0, 0.25], [-0.5, 1.5]],
            bias: array![0.1, -0.2],
        };
        let x = array![[1.0f32, 2.0, -1.0], [0.5, -0.5, 3.0]];
        // L = sum(y), so dL/dy is all ones.
        let ones = Array2::from_elem((2, 2), 1.0f32);
        let (grad, grad_in) = layer.backward(x.view(), ones.view());

        let loss = |l: &Dense| l.forward(x.view()).sum();
        let h = 1e-2f32;
        let mut bumped = layer.clone();
        bumped.weight[[1, 0]] += h;
        let fd = (loss(&bumped) - loss(&layer)) / h;
        assert!((fd - grad.weight[[1, 0]]).abs() < 1e-2);

        assert_eq!(grad.bias.to_vec(), vec![2.0, 2.0]);
        // dL/dx_ij = sum_k W_jk
        assert!((grad_in[[0, 1]] - 2.25).abs() < 1e-6);
    }
}

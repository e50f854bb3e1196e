//! Mixture loss coupling the network output to the fitted mixture.
//!
//! ```text
//! L = -(β / K) Σᵢ Σₖ ln(πₖ pᵢₖ)
//! ```
//!
//! `πₖ = Nₖ / M` are the mixing weights from the responsibilities and
//! `pᵢₖ = max(eps, P(k | yᵢ))` are the clamped mixture posteriors of the
//! network output `y`.
//!
//! The mixture parameters enter as a frozen [`MixtureParameters`] snapshot
//! and `π` as plain values: neither receives a gradient. The only path
//! back into the network is through `y` in the Gaussian posteriors. With
//! `lᵢⱼ = ln wⱼ + ln N(yᵢ | μⱼ, σ²ⱼ)` and `pᵢ = softmax(lᵢ)`:
//!
//! ```text
//! ∂L/∂yᵢ = (β / K) Σⱼ (uᵢⱼ - Uᵢ pᵢⱼ) (yᵢ - μⱼ) / σ²ⱼ
//! ```
//!
//! where `uᵢⱼ = 1` if `pᵢⱼ ≥ eps` (the clamp passes gradient) and
//! `Uᵢ = Σⱼ uᵢⱼ`.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Zip};

use crate::cluster::MixtureParameters;
use crate::error::{Error, Result};

/// Loss value and its gradient w.r.t. the network output.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Scalar loss.
    pub value: f64,
    /// dL/dy, same shape as the output batch.
    pub grad: Array2<f32>,
}

/// `-(β/K) Σ ln(π p)` with a detached mixture.
#[derive(Debug, Clone, Copy)]
pub struct MixtureLoss {
    beta: f64,
    n_clusters: usize,
    eps: f64,
}

impl MixtureLoss {
    /// Create the loss for `n_clusters` components.
    pub fn new(beta: f64, n_clusters: usize, eps: f64) -> Self {
        Self {
            beta,
            n_clusters,
            eps,
        }
    }

    /// Evaluate on network output `output` under the frozen mixture `frozen`
    /// and mixing weights `mixing`.
    pub fn evaluate(
        &self,
        output: ArrayView2<'_, f32>,
        frozen: &MixtureParameters,
        mixing: ArrayView1<'_, f64>,
    ) -> Result<LossOutput> {
        let k = self.n_clusters;
        if frozen.n_components() != k || mixing.len() != k {
            return Err(Error::ShapeMismatch {
                expected: format!("{k} components"),
                actual: format!(
                    "{} mixture components, {} mixing weights",
                    frozen.n_components(),
                    mixing.len()
                ),
            });
        }

        let (posterior, _) = frozen.posteriors(output)?;
        let scale = self.beta / k as f64;

        let log_mixing = mixing.mapv(f64::ln);
        let mut total = 0.0;
        for row in posterior.axis_iter(Axis(0)) {
            for (p, lm) in row.iter().zip(log_mixing.iter()) {
                total += lm + p.max(self.eps).ln();
            }
        }
        let value = -scale * total;
        if !value.is_finite() {
            return Err(Error::unstable(
                "loss",
                format!("value {value} (mixing weights {mixing})"),
            ));
        }

        let inv_var = frozen.covariances.mapv(f64::recip);
        let mut grad = Array2::<f32>::zeros(output.raw_dim());
        Zip::from(grad.rows_mut())
            .and(output.rows())
            .and(posterior.rows())
            .for_each(|mut g, y, p| {
                let unclamped = p.iter().filter(|&&v| v >= self.eps).count() as f64;
                for j in 0..k {
                    let u = if p[j] >= self.eps { 1.0 } else { 0.0 };
                    let coef = scale * (u - unclamped * p[j]);
                    if coef == 0.0 {
                        continue;
                    }
                    let mean = frozen.means.row(j);
                    let iv = inv_var.row(j);
                    for d in 0..g.len() {
                        g[d] += (coef * (y[d] as f64 - mean[d]) * iv[d]) as f32;
                    }
                }
            });

        if let Some(((i, d), v)) = grad.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::unstable("loss gradient", format!("dL/dy[{i}, {d}] = {v}")));
        }

        Ok(LossOutput { value, grad })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn overlapping() -> MixtureParameters {
        MixtureParameters {
            weights: array![0.4, 0.6],
            means: array![[0.0, 0.0], [1.0, 0.5]],
            covariances: array![[1.0, 2.0], [0.5, 1.0]],
        }
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let loss = MixtureLoss::new(1.0, 2, 1e-6);
        let params = overlapping();
        let mixing = array![0.3, 0.7];
        let y = array![[0.2f32, -0.1], [0.8, 0.9], [-0.5, 0.3]];

        let out = loss.evaluate(y.view(), &params, mixing.view()).unwrap();
        let h = 1e-3f32;
        for i in 0..3 {
            for d in 0..2 {
                let mut bumped = y.clone();
                bumped[[i, d]] += h;
                let up = loss.evaluate(bumped.view(), &params, mixing.view()).unwrap().value;
                bumped[[i, d]] -= 2.0 * h;
                let down = loss.evaluate(bumped.view(), &params, mixing.view()).unwrap().value;
                let fd = (up - down) / (2.0 * h as f64);
                let analytic = out.grad[[i, d]] as f64;
                assert!((fd - analytic).abs() < 1e-3, "[{i},{d}] fd {fd} vs {analytic}");
            }
        }
    }

    #[test]
    fn test_value_matches_closed_form() {
        let params = MixtureParameters {
            weights: array![0.5, 0.5],
            means: array![[-1.0], [1.0]],
            covariances: array![[1.0], [1.0]],
        };
        // Row 0 sits midway: posteriors 1/2 each. Row 1 sits on the second
        // mean: P(0 | y) = e^-2 / (1 + e^-2) ≈ 0.119, clamped up to eps = 0.3.
        let y = array![[0.0f32], [1.0]];
        let mixing = array![0.25, 0.75];
        let (beta, eps) = (2.0, 0.3);

        let q = (-2.0f64).exp() / (1.0 + (-2.0f64).exp());
        let log_pi = 0.25f64.ln() + 0.75f64.ln();
        let total = 2.0 * log_pi + 2.0 * 0.5f64.ln() + q.max(eps).ln() + (1.0 - q).ln();
        let expected = -(beta / 2.0) * total;

        let out = MixtureLoss::new(beta, 2, eps)
            .evaluate(y.view(), &params, mixing.view())
            .unwrap();
        assert!((out.value - expected).abs() < 1e-10, "{} vs {expected}", out.value);
        // Without the clamp the value would differ.
        let unclamped = -(beta / 2.0) * (total - q.max(eps).ln() + q.ln());
        assert!((out.value - unclamped).abs() > 0.1);
    }

    #[test]
    fn test_single_component_loss_is_mixing_only() {
        let params = MixtureParameters {
            weights: array![1.0],
            means: array![[0.0, 0.0]],
            covariances: array![[1.0, 1.0]],
        };
        let y = array![[0.3f32, 0.1], [2.0, -1.0]];
        let out = MixtureLoss::new(1e-4, 1, 1e-6)
            .evaluate(y.view(), &params, array![1.0].view())
            .unwrap();
        // -(β/1) Σ ln(1 · 1) = 0, and no gradient.
        assert_eq!(out.value, 0.0);
        assert!(out.grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_zero_mixing_weight_is_unstable() {
        let y = array![[0.0f32, 0.0]];
        let err = MixtureLoss::new(1.0, 2, 1e-6)
            .evaluate(y.view(), &overlapping(), array![1.0, 0.0].view())
            .unwrap_err();
        assert!(matches!(err, Error::NumericalInstability { stage: "loss", .. }));
    }

    #[test]
    fn test_clamped_posteriors_pass_no_gradient() {
        let params = MixtureParameters {
            weights: array![0.5, 0.5],
            means: array![[0.0], [100.0]],
            covariances: array![[1.0], [1.0]],
        };
        // Each row sits on a mean: its posterior is ~1 there and clamped elsewhere.
        let y = array![[0.0f32], [100.0]];
        let out = MixtureLoss::new(1.0, 2, 1e-6)
            .evaluate(y.view(), &params, Array1::from_elem(2, 0.5).view())
            .unwrap();
        assert!(out.grad.iter().all(|&g| g.abs() < 1e-6));
    }

    #[test]
    fn test_mismatched_components() {
        let y = array![[0.0f32, 0.0]];
        assert!(MixtureLoss::new(1.0, 3, 1e-6)
            .evaluate(y.view(), &overlapping(), array![0.5, 0.5].view())
            .is_err());
    }
}

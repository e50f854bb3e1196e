//! Diagonal-covariance Gaussian Mixture Model.
//!
//! # The Probabilistic Model
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, diag(σ²ₖ))
//! ```
//!
//! With diagonal covariance the log-density factorizes per dimension, so
//! both EM steps are closed-form and O(M·K·D).
//!
//! # The EM Algorithm
//!
//! **E-step**: responsibilities
//! ```text
//! rₙₖ = πₖ N(xₙ | μₖ, σ²ₖ) / Σⱼ πⱼ N(xₙ | μⱼ, σ²ⱼ)
//! ```
//!
//! **M-step**:
//! - Nₖ = Σₙ rₙₖ,  πₖ = Nₖ / M
//! - μₖ = Σₙ rₙₖ xₙ / Nₖ
//! - σ²ₖ = Σₙ rₙₖ (xₙ - μₖ)² / Nₖ + reg_covar
//!
//! Iteration stops when the mean log-likelihood improves by less than `tol`
//! or after `max_iter` rounds.
//!
//! # Failure Modes
//!
//! A component that ends up with no responsibility mass, or whose raw
//! variance in any single dimension falls to [`VARIANCE_FLOOR`], is
//! reported as [`Error::IllConditionedMixture`]
//! instead of being silently patched. Fewer rows than components is rejected
//! up front.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use tracing::debug;

use super::traits::{Clustering, SoftClustering};
use crate::error::{Error, Result};

/// Smallest raw per-dimension variance a component may keep before
/// `reg_covar` is added. Anything at or below it is a collapse.
pub const VARIANCE_FLOOR: f64 = 1e-12;

/// Fitted mixture state: weights, means ("psi") and diagonal covariances ("Sigma").
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureParameters {
    /// Mixing weights, length K, summing to 1.
    pub weights: Array1<f64>,
    /// Component means, K×D.
    pub means: Array2<f64>,
    /// Diagonal covariances, K×D.
    pub covariances: Array2<f64>,
}

impl MixtureParameters {
    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// Dimensionality.
    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    /// Unnormalized log joint `ln πₖ + ln N(x | μₖ, σ²ₖ)` for every row and component.
    pub fn log_joint(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f64>> {
        if data.ncols() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                found: data.ncols(),
            });
        }
        let k = self.n_components();
        // Per-component constant: ln πₖ - ½ Σ_d ln(2π σ²ₖd).
        let offsets: Vec<f64> = (0..k)
            .map(|c| {
                self.weights[c].ln()
                    - 0.5
                        * self
                            .covariances
                            .row(c)
                            .iter()
                            .map(|v| (2.0 * std::f64::consts::PI * v).ln())
                            .sum::<f64>()
            })
            .collect();
        let inv_var = self.covariances.mapv(f64::recip);

        let mut out = Array2::zeros((data.nrows(), k));
        for (mut out_row, point) in out.axis_iter_mut(Axis(0)).zip(data.axis_iter(Axis(0))) {
            for c in 0..k {
                out_row[c] = offsets[c]
                    - 0.5 * mahalanobis_sq(point, self.means.row(c), inv_var.row(c));
            }
        }
        Ok(out)
    }

    /// Exact posteriors `P(k | x)` per row, with the mean log-likelihood.
    pub fn posteriors(&self, data: ArrayView2<'_, f32>) -> Result<(Array2<f64>, f64)> {
        let mut log_joint = self.log_joint(data)?;
        let mut total = 0.0;
        for mut row in log_joint.axis_iter_mut(Axis(0)) {
            let log_sum = logsumexp(row.view());
            total += log_sum;
            row.mapv_inplace(|v| (v - log_sum).exp());
        }
        let mean_ll = total / data.nrows().max(1) as f64;
        if !mean_ll.is_finite() {
            return Err(Error::unstable(
                "mixture posteriors",
                format!("mean log-likelihood is {mean_ll}"),
            ));
        }
        Ok((log_joint, mean_ll))
    }
}

/// Gaussian Mixture Model with diagonal covariance, refit from scratch on every `fit`.
#[derive(Debug, Clone)]
pub struct MixtureModel {
    /// Number of components.
    n_components: usize,
    /// Maximum EM iterations.
    max_iter: usize,
    /// Early-stop threshold on mean log-likelihood improvement.
    tol: f64,
    /// Regularization added to every variance.
    reg_covar: f64,
    /// Lower clamp for `predict_proba`.
    eps: f64,
    /// Seed for k-means++ mean initialization.
    seed: u64,
    /// Parameters from the latest `fit`.
    params: Option<MixtureParameters>,
}

impl MixtureModel {
    /// Create a mixture with `n_components` components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            eps: 1e-6,
            seed: 0,
            params: None,
        }
    }

    /// Set maximum EM iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set covariance regularization.
    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Set the probability clamp.
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parameters from the latest fit.
    pub fn parameters(&self) -> Option<&MixtureParameters> {
        self.params.as_ref()
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Fit the mixture to an M×D matrix, replacing any previous parameters.
    pub fn fit(&mut self, data: ArrayView2<'_, f32>) -> Result<&MixtureParameters> {
        // Drop stale parameters first so a failed refit cannot be mistaken for a fit.
        self.params = None;

        let (n, d) = data.dim();
        let k = self.n_components;
        if n == 0 || d == 0 {
            return Err(Error::EmptyInput);
        }
        if k == 0 {
            return Err(Error::config("n_clusters", "must be >= 1"));
        }
        if n < k {
            return Err(Error::ill_conditioned(format!(
                "{n} samples cannot support {k} components"
            )));
        }
        if let Some(((i, j), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::unstable("mixture fit input", format!("x[{i}, {j}] = {v}")));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut params = MixtureParameters {
            weights: Array1::from_elem(k, 1.0 / k as f64),
            means: init_means(data, k, &mut rng),
            covariances: initial_variances(data, self.reg_covar, k),
        };

        let mut prev_ll = f64::NEG_INFINITY;
        for iter in 0..self.max_iter {
            let (resp, mean_ll) = params.posteriors(data)?;
            params = self.m_step(data, resp.view())?;

            let gain = mean_ll - prev_ll;
            prev_ll = mean_ll;
            if gain.abs() < self.tol {
                debug!(iter, mean_ll, "mixture EM converged");
                break;
            }
        }

        Ok(&*self.params.insert(params))
    }

    /// Posterior membership per row, clamped below at `eps`.
    pub fn predict_proba(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f64>> {
        let params = self.params.as_ref().ok_or(Error::NotFitted)?;
        let (probs, _) = params.posteriors(data)?;
        Ok(probs.mapv(|p| p.max(self.eps)))
    }

    fn m_step(&self, data: ArrayView2<'_, f32>, resp: ArrayView2<'_, f64>) -> Result<MixtureParameters> {
        let (n, d) = data.dim();
        let k = self.n_components;
        let x = data.mapv(f64::from);

        let nk = resp.sum_axis(Axis(0));
        let mut means = resp.t().dot(&x);
        let mut covariances = Array2::zeros((k, d));

        for c in 0..k {
            if nk[c] < 10.0 * f64::EPSILON {
                return Err(Error::ill_conditioned(format!(
                    "component {c} received no responsibility mass"
                )));
            }
            let mut mean = means.row_mut(c);
            mean /= nk[c];

            let mut var = covariances.row_mut(c);
            for (point, r) in x.axis_iter(Axis(0)).zip(resp.column(c)) {
                for j in 0..d {
                    let diff = point[j] - mean[j];
                    var[j] += r * diff * diff;
                }
            }
            var /= nk[c];

            if let Some((j, v)) = var.iter().enumerate().find(|&(_, &v)| !(v > VARIANCE_FLOOR)) {
                return Err(Error::ill_conditioned(format!(
                    "component {c} variance collapsed in dimension {j} (raw variance {v:e})"
                )));
            }
            var += self.reg_covar;
        }

        Ok(MixtureParameters {
            weights: nk / n as f64,
            means,
            covariances,
        })
    }
}

impl Clustering for MixtureModel {
    fn fit_predict(&self, data: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        let probs = self.fit_predict_proba(data)?;

        // Hard assignment: argmax
        Ok(probs
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    fn n_clusters(&self) -> usize {
        self.n_components
    }
}

impl SoftClustering for MixtureModel {
    fn fit_predict_proba(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f64>> {
        let mut model = self.clone();
        model.fit(data)?;
        model.predict_proba(data)
    }
}

/// Squared distance to `mean` scaled by the diagonal precision.
fn mahalanobis_sq(
    point: ArrayView1<'_, f32>,
    mean: ArrayView1<'_, f64>,
    inv_var: ArrayView1<'_, f64>,
) -> f64 {
    point
        .iter()
        .zip(mean.iter().zip(inv_var.iter()))
        .map(|(&x, (&m, &iv))| {
            let diff = x as f64 - m;
            diff * diff * iv
        })
        .sum()
}

/// Log-sum-exp for numerical stability.
fn logsumexp(values: ArrayView1<'_, f64>) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

/// k-means++ seeding for the component means.
fn init_means(data: ArrayView2<'_, f32>, k: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = data.nrows();
    let mut means = Array2::zeros((k, data.ncols()));
    let mut chosen = vec![rng.random_range(0..n)];

    let sq = |a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>| -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| ((x - y) as f64).powi(2)).sum()
    };

    while chosen.len() < k {
        let distances: Vec<f64> = (0..n)
            .map(|i| {
                chosen
                    .iter()
                    .map(|&c| sq(data.row(i), data.row(c)))
                    .fold(f64::MAX, f64::min)
            })
            .collect();

        let total: f64 = distances.iter().sum();
        let next = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            distances
                .iter()
                .position(|&dist| {
                    cumsum += dist;
                    cumsum >= threshold
                })
                .unwrap_or(n - 1)
        };
        chosen.push(next);
    }

    for (c, &idx) in chosen.iter().enumerate() {
        means.row_mut(c).assign(&data.row(idx).mapv(f64::from));
    }
    means
}

/// Per-dimension data variance, shared by every component at start.
fn initial_variances(data: ArrayView2<'_, f32>, reg_covar: f64, k: usize) -> Array2<f64> {
    let x = data.mapv(f64::from);
    let var = x.var_axis(Axis(0), 0.0).mapv(|v| v.max(reg_covar) + reg_covar);
    let mut out = Array2::zeros((k, data.ncols()));
    for mut row in out.axis_iter_mut(Axis(0)) {
        row.assign(&var);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    /// Samples from K isotropic Gaussians, `per` rows each, in block order.
    fn gaussian_blobs(centers: &[[f32; 2]], per: usize, std: f32, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, std).unwrap();
        let mut flat = Vec::with_capacity(centers.len() * per * 2);
        for c in centers {
            for _ in 0..per {
                flat.push(c[0] + noise.sample(&mut rng));
                flat.push(c[1] + noise.sample(&mut rng));
            }
        }
        Array2::from_shape_vec((centers.len() * per, 2), flat).unwrap()
    }

    #[test]
    fn test_recovers_generating_means() {
        let centers = [[0.0, 0.0], [8.0, 8.0], [-8.0, 8.0]];
        let data = gaussian_blobs(&centers, 80, 0.5, 7);

        let mut gmm = MixtureModel::new(3).with_seed(42);
        let params = gmm.fit(data.view()).unwrap().clone();

        for center in &centers {
            let best = params
                .means
                .axis_iter(Axis(0))
                .map(|m| ((m[0] - center[0] as f64).powi(2) + (m[1] - center[1] as f64).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert!(best < 0.25, "no mean near {center:?} (closest {best})");
        }
        let wsum: f64 = params.weights.sum();
        assert!((wsum - 1.0).abs() < 1e-9);
        for &v in params.covariances.iter() {
            assert!(v > 0.1 && v < 0.5, "variance {v} far from 0.25");
        }
    }

    #[test]
    fn test_predict_proba_rows_and_clamp() {
        let data = gaussian_blobs(&[[0.0, 0.0], [20.0, 20.0]], 30, 0.3, 11);
        let mut gmm = MixtureModel::new(2).with_seed(1).with_eps(1e-6);
        gmm.fit(data.view()).unwrap();
        let probs = gmm.predict_proba(data.view()).unwrap();

        assert_eq!(probs.dim(), (60, 2));
        for row in probs.axis_iter(Axis(0)) {
            // Far-apart blobs: the losing component is clamped to eps.
            assert!(row.iter().all(|&p| p >= 1e-6));
            assert!(row.iter().any(|&p| p == 1e-6));
        }
    }

    #[test]
    fn test_fewer_samples_than_components() {
        let data = Array2::from_shape_vec((2, 2), vec![0.0f32, 0.0, 1.0, 1.0]).unwrap();
        let err = MixtureModel::new(3).fit(data.view()).unwrap_err();
        assert!(matches!(err, Error::IllConditionedMixture { .. }));
    }

    #[test]
    fn test_identical_points_collapse() {
        let data = Array2::from_elem((10, 4), 2.0f32);
        let err = MixtureModel::new(1).fit(data.view()).unwrap_err();
        assert!(matches!(err, Error::IllConditionedMixture { .. }), "{err}");
    }

    #[test]
    fn test_single_constant_dimension_collapses() {
        // Column 0 is constant, column 1 holds two blobs.
        let mut data = gaussian_blobs(&[[3.0, 0.0], [3.0, 6.0]], 20, 0.5, 13);
        data.column_mut(0).fill(3.0);

        let mut gmm = MixtureModel::new(2).with_seed(4);
        let err = gmm.fit(data.view()).unwrap_err();
        match err {
            Error::IllConditionedMixture { reason } => {
                assert!(reason.contains("dimension 0"), "{reason}");
            }
            other => panic!("expected a collapse, got {other}"),
        }
        assert!(gmm.parameters().is_none());
    }

    #[test]
    fn test_predict_before_fit() {
        let data = Array2::<f32>::zeros((3, 2));
        assert!(matches!(
            MixtureModel::new(2).predict_proba(data.view()),
            Err(Error::NotFitted)
        ));
    }

    #[test]
    fn test_refit_overwrites() {
        let a = gaussian_blobs(&[[0.0, 0.0], [10.0, 0.0]], 40, 0.5, 3);
        let b = a.mapv(|v| v + 100.0);
        let mut gmm = MixtureModel::new(2).with_seed(5);
        gmm.fit(a.view()).unwrap();
        gmm.fit(b.view()).unwrap();
        let means = &gmm.parameters().unwrap().means;
        assert!(means.iter().all(|&m| m > 90.0));
    }

    #[test]
    fn test_single_component_posterior_is_one() {
        let data = gaussian_blobs(&[[1.0, -1.0]], 25, 1.0, 9);
        let mut gmm = MixtureModel::new(1);
        gmm.fit(data.view()).unwrap();
        let probs = gmm.predict_proba(data.view()).unwrap();
        assert!(probs.iter().all(|&p| (p - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_fit_predict_separates() {
        let data = gaussian_blobs(&[[0.0, 0.0], [10.0, 10.0]], 20, 0.5, 2);
        let labels = MixtureModel::new(2).with_seed(3).fit_predict(data.view()).unwrap();
        assert!(labels[..20].iter().all(|&l| l == labels[0]));
        assert!(labels[20..].iter().all(|&l| l == labels[20]));
        assert_ne!(labels[0], labels[20]);
    }
}

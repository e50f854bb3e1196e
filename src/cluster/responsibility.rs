//! Responsibilities and mixing weights.
//!
//! ```text
//! γᵢₖ = wᵢₖ pᵢₖ / Σⱼ wᵢⱼ pᵢⱼ        (rows sum to 1)
//! πₖ  = Nₖ / M,   Nₖ = Σᵢ γᵢₖ      (sums to 1)
//! ```
//!
//! `w` is either a 1×K weight row broadcast over the batch, or a full M×K
//! matrix such as the K-means affinity.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{Error, Result};

/// Row-normalized `weights * probs`.
///
/// A row whose weighted sum is exactly zero (every weight in the row is 0)
/// falls back to the normalized `probs` row, as if the weights were uniform.
/// `probs` is expected to be eps-clamped, so that fallback always has a
/// positive denominator.
pub fn responsibilities(weights: ArrayView2<'_, f64>, probs: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let (m, k) = probs.dim();
    if m == 0 || k == 0 {
        return Err(Error::EmptyInput);
    }
    let broadcast = match weights.dim() {
        (1, wk) if wk == k => true,
        (wm, wk) if wm == m && wk == k => false,
        (wm, wk) => {
            return Err(Error::ShapeMismatch {
                expected: format!("1x{k} or {m}x{k}"),
                actual: format!("{wm}x{wk}"),
            })
        }
    };

    let mut gamma = Array2::zeros((m, k));
    for (i, (mut out, p)) in gamma.axis_iter_mut(Axis(0)).zip(probs.axis_iter(Axis(0))).enumerate() {
        let w = weights.row(if broadcast { 0 } else { i });
        out.assign(&(&w * &p));

        let mut total = out.sum();
        if total == 0.0 {
            out.assign(&p);
            total = out.sum();
        }
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::unstable(
                "responsibilities",
                format!("row {i} has weighted sum {total}"),
            ));
        }
        out /= total;
    }
    Ok(gamma)
}

/// Mixing weights `N_k / M` from a responsibility matrix.
pub fn mixing_weights(gamma: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    let m = gamma.nrows();
    if m == 0 || gamma.ncols() == 0 {
        return Err(Error::EmptyInput);
    }
    let weights = gamma.sum_axis(Axis(0)) / m as f64;
    if let Some((c, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite()) {
        return Err(Error::unstable("mixing weights", format!("weight {c} is {w}")));
    }
    Ok(weights)
}

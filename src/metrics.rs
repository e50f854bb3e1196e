//! Agreement between a predicted clustering and ground-truth classes.
//!
//! | Metric | Range | Best | Properties |
//! |--------|-------|------|------------|
//! | [`nmi`] | [0, 1] | 1 | Label-permutation invariant, arithmetic normalization |
//! | [`ari`] | [-1, 1] | 1 | Adjusted for chance |
//!
//! # Example
//!
//! ```rust
//! use embed_gmm::metrics::{ari, nmi};
//!
//! let pred = [1, 1, 0, 0, 2, 2];
//! let truth = [0, 0, 1, 1, 2, 2];
//! assert!((nmi(&pred, &truth) - 1.0).abs() < 1e-12);
//! assert!((ari(&pred, &truth) - 1.0).abs() < 1e-12);
//! ```
//!
//! # References
//!
//! - Strehl & Ghosh (2002). "Cluster ensembles" (NMI)
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)

use std::collections::HashMap;

/// Joint and marginal label counts.
struct Contingency {
    joint: HashMap<(usize, usize), usize>,
    pred: HashMap<usize, usize>,
    truth: HashMap<usize, usize>,
    n: usize,
}

impl Contingency {
    fn new(pred: &[usize], truth: &[usize]) -> Self {
        let mut table = Self {
            joint: HashMap::new(),
            pred: HashMap::new(),
            truth: HashMap::new(),
            n: pred.len(),
        };
        for (&p, &t) in pred.iter().zip(truth) {
            *table.joint.entry((p, t)).or_insert(0) += 1;
            *table.pred.entry(p).or_insert(0) += 1;
            *table.truth.entry(t).or_insert(0) += 1;
        }
        table
    }

    fn entropy(counts: &HashMap<usize, usize>, n: f64) -> f64 {
        counts
            .values()
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.ln()
            })
            .sum()
    }
}

/// Normalized Mutual Information.
///
/// ```text
/// NMI(U, V) = 2 I(U; V) / (H(U) + H(V))
/// ```
///
/// Returns 0 for empty or length-mismatched input, and 1 when both
/// labelings are constant.
pub fn nmi(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }
    let table = Contingency::new(pred, truth);
    let n = table.n as f64;

    let h_pred = Contingency::entropy(&table.pred, n);
    let h_truth = Contingency::entropy(&table.truth, n);

    let mi: f64 = table
        .joint
        .iter()
        .map(|(&(p, t), &count)| {
            let p_joint = count as f64 / n;
            let p_p = table.pred[&p] as f64 / n;
            let p_t = table.truth[&t] as f64 / n;
            p_joint * (p_joint / (p_p * p_t)).ln()
        })
        .sum();

    let denom = h_pred + h_truth;
    if denom > 0.0 {
        (2.0 * mi / denom).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Adjusted Rand Index.
///
/// Returns 0 for empty or length-mismatched input.
pub fn ari(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }
    let table = Contingency::new(pred, truth);

    let comb2 = |x: usize| if x < 2 { 0.0 } else { (x * (x - 1) / 2) as f64 };
    let sum_ij: f64 = table.joint.values().map(|&c| comb2(c)).sum();
    let sum_a: f64 = table.pred.values().map(|&c| comb2(c)).sum();
    let sum_b: f64 = table.truth.values().map(|&c| comb2(c)).sum();

    let expected = sum_a * sum_b / comb2(table.n).max(1.0);
    let max_index = (sum_a + sum_b) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return 1.0;
    }
    (sum_ij - expected) / denom
}

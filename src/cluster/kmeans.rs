//! Batched K-means with a soft-affinity byproduct.
//!
//! Lloyd iterations over a single batch, seeded deterministically with the
//! first `k` rows of the batch:
//!
//! 1. **Distance**: squared Euclidean distance from every row to every centroid
//! 2. **Assign**: each row goes to its nearest centroid (lowest index on ties)
//! 3. **Update**: each centroid becomes the mean of its members
//!
//! The seeding is simplistic on purpose: the same batch always clusters the
//! same way, and the training loop re-runs it on every batch anyway.
//!
//! # Soft affinity
//!
//! Alongside the hard labels, [`BatchedKMeans::assign`] returns
//!
//! ```text
//! affinity = 1 - normalize(D)
//! ```
//!
//! where `D` is the final M×K distance matrix and [`normalize`] is min-max
//! scaling over the *whole* matrix. This is not a probability distribution:
//! rows do not sum to 1. It is a different quantity from the mixing weights
//! `N_k / M` computed later in the training step.

use ndarray::{Array2, ArrayView2, Axis, Zip};
use tracing::warn;

#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;

use super::traits::Clustering;
use crate::config::EmptyClusterPolicy;
use crate::error::{Error, Result};

/// Hard labels and soft affinities for one batch.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    /// Cluster index per row.
    pub labels: Vec<usize>,
    /// M×K matrix `1 - normalize(distances)`.
    pub affinity: Array2<f32>,
}

/// K-means over a single batch, first-k-rows initialization.
#[derive(Debug, Clone)]
pub struct BatchedKMeans {
    /// Number of clusters.
    k: usize,
    /// Lloyd iterations.
    n_iter: usize,
    /// What to do with a cluster that loses all members.
    empty_cluster: EmptyClusterPolicy,
}

impl BatchedKMeans {
    /// Create a batched K-means with 10 iterations.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            n_iter: 10,
            empty_cluster: EmptyClusterPolicy::Fail,
        }
    }

    /// Set the number of Lloyd iterations.
    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    /// Set the empty-cluster policy.
    pub fn with_empty_cluster(mut self, policy: EmptyClusterPolicy) -> Self {
        self.empty_cluster = policy;
        self
    }

    /// Cluster one batch.
    pub fn assign(&self, batch: ArrayView2<'_, f32>) -> Result<ClusterAssignment> {
        let n = batch.nrows();
        if n == 0 {
            return Err(Error::EmptyInput);
        }
        if self.k == 0 || self.k > n {
            return Err(Error::config(
                "n_clusters",
                format!("cannot create {} clusters from {} rows", self.k, n),
            ));
        }
        if self.n_iter == 0 {
            return Err(Error::config("kmeans_iters", "must be >= 1"));
        }

        let mut centroids = batch.slice(ndarray::s![..self.k, ..]).to_owned();
        let mut distances = Array2::zeros((n, self.k));
        let mut labels = vec![0usize; n];

        for iter in 0..self.n_iter {
            distances = squared_distances(batch, centroids.view());
            if let Some(((i, k), v)) = distances.indexed_iter().find(|(_, v)| !v.is_finite()) {
                return Err(Error::unstable(
                    "kmeans distances",
                    format!("iteration {iter}: distance[{i}, {k}] = {v}"),
                ));
            }
            labels = argmin_rows(distances.view());
            centroids = self.update_centroids(batch, &labels, centroids, iter)?;
        }

        let affinity = normalize(distances.view()).mapv(|v| 1.0 - v);
        Ok(ClusterAssignment { labels, affinity })
    }

    /// Recompute each centroid as the mean of its members.
    fn update_centroids(
        &self,
        batch: ArrayView2<'_, f32>,
        labels: &[usize],
        previous: Array2<f32>,
        iter: usize,
    ) -> Result<Array2<f32>> {
        let mut sums = Array2::<f32>::zeros((self.k, batch.ncols()));
        let mut counts = vec![0usize; self.k];

        for (row, &label) in batch.axis_iter(Axis(0)).zip(labels) {
            let mut acc = sums.row_mut(label);
            acc += &row;
            counts[label] += 1;
        }

        for (c, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mut centroid = sums.row_mut(c);
                centroid /= count as f32;
                continue;
            }
            match self.empty_cluster {
                EmptyClusterPolicy::Fail => {
                    return Err(Error::unstable(
                        "kmeans centroid update",
                        format!("iteration {iter}: cluster {c} has no members"),
                    ));
                }
                EmptyClusterPolicy::KeepPrevious => {
                    warn!(iteration = iter, cluster = c, "empty cluster keeps previous centroid");
                    sums.row_mut(c).assign(&previous.row(c));
                }
            }
        }

        Ok(sums)
    }
}

impl Clustering for BatchedKMeans {
    fn fit_predict(&self, data: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        Ok(self.assign(data)?.labels)
    }

    fn n_clusters(&self) -> usize {
        self.k
    }
}

/// M×K matrix of squared Euclidean distances from rows to centroids.
pub fn squared_distances(data: ArrayView2<'_, f32>, centroids: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = Array2::zeros((data.nrows(), centroids.nrows()));

    let fill = |mut dist_row: ndarray::ArrayViewMut1<'_, f32>, point: ndarray::ArrayView1<'_, f32>| {
        for (d, centroid) in dist_row.iter_mut().zip(centroids.axis_iter(Axis(0))) {
            *d = point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
        }
    };

    #[cfg(feature = "parallel")]
    Zip::from(out.rows_mut())
        .and(data.rows())
        .par_for_each(fill);

    #[cfg(not(feature = "parallel"))]
    Zip::from(out.rows_mut())
        .and(data.rows())
        .for_each(fill);

    out
}

/// Column index of each row's minimum; the first occurrence wins ties.
pub fn argmin_rows(distances: ArrayView2<'_, f32>) -> Vec<usize> {
    distances
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0;
            let mut best_dist = f32::INFINITY;
            for (k, &d) in row.iter().enumerate() {
                if d < best_dist {
                    best_dist = d;
                    best = k;
                }
            }
            best
        })
        .collect()
}

/// Min-max scale over every entry of the matrix.
///
/// If all entries are equal the result is all zeros.
pub fn normalize(values: ArrayView2<'_, f32>) -> Array2<f32> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    if !(range > 0.0) {
        return Array2::zeros(values.raw_dim());
    }
    values.mapv(|v| (v - min) / range)
}

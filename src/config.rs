//! Run configuration.
//!
//! Every hyperparameter of a training run lives in [`ClusterConfig`]. The
//! defaults reproduce the citation-graph setup: 400-dimensional skip-gram
//! vectors, 7 communities, batches of 300.

use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What K-means does when a cluster ends an iteration with no members.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EmptyClusterPolicy {
    /// Raise [`Error::NumericalInstability`]; the mean of zero members is undefined.
    #[default]
    Fail,
    /// Keep the centroid from the previous iteration.
    KeepPrevious,
}

/// Hyperparameters for a joint embedding / mixture clustering run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterConfig {
    /// Node vector dimensionality (network input and output width).
    pub dim: usize,
    /// Number of clusters K.
    pub n_clusters: usize,
    /// Lower clamp for posterior probabilities.
    pub eps: f64,
    /// Loss scale.
    pub beta: f64,
    /// Rows per batch.
    pub batch_size: usize,
    /// Fixed number of epochs.
    pub epochs: usize,
    /// K-means iterations per training batch.
    pub kmeans_iters: usize,
    /// K-means iterations for the final assignment.
    pub eval_kmeans_iters: usize,
    /// Hidden layer widths of the embedding network.
    pub hidden_dims: Vec<usize>,
    /// Dropout rate between hidden layers.
    pub dropout: f32,
    /// SGD learning rate.
    pub learning_rate: f32,
    /// SGD momentum.
    pub momentum: f32,
    /// EM iteration cap.
    pub gmm_max_iter: usize,
    /// EM early-stop threshold on mean log-likelihood improvement.
    pub gmm_tol: f64,
    /// Added to every diagonal variance.
    pub reg_covar: f64,
    /// Empty-cluster behavior for K-means.
    pub empty_cluster: EmptyClusterPolicy,
    /// Seed for shuffling, dropout, weight init, and EM seeding.
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dim: 400,
            n_clusters: 7,
            eps: 1e-6,
            beta: 1e-4,
            batch_size: 300,
            epochs: 10,
            kmeans_iters: 10,
            eval_kmeans_iters: 100,
            hidden_dims: vec![1024, 512, 256],
            dropout: 0.05,
            learning_rate: 0.01,
            momentum: 0.9,
            gmm_max_iter: 100,
            gmm_tol: 1e-3,
            reg_covar: 1e-6,
            empty_cluster: EmptyClusterPolicy::Fail,
            seed: 42,
        }
    }
}

impl ClusterConfig {
    /// Set the vector dimensionality.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    /// Set the number of clusters.
    pub fn with_n_clusters(mut self, k: usize) -> Self {
        self.n_clusters = k;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the epoch count.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set K-means iterations for training batches.
    pub fn with_kmeans_iters(mut self, iters: usize) -> Self {
        self.kmeans_iters = iters;
        self
    }

    /// Set the loss scale.
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the hidden layer widths.
    pub fn with_hidden_dims(mut self, dims: Vec<usize>) -> Self {
        self.hidden_dims = dims;
        self
    }

    /// Set the dropout rate.
    pub fn with_dropout(mut self, p: f32) -> Self {
        self.dropout = p;
        self
    }

    /// Set the learning rate.
    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set the empty-cluster policy.
    pub fn with_empty_cluster(mut self, policy: EmptyClusterPolicy) -> Self {
        self.empty_cluster = policy;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of batches per epoch for `n_items` rows.
    ///
    /// Leftover rows join the last full batch instead of forming a short
    /// batch of their own, so this is `n_items / batch_size` (at least 1).
    pub fn batches_per_epoch(&self, n_items: usize) -> usize {
        (n_items / self.batch_size.max(1)).max(1)
    }

    /// Row ranges of each batch over an epoch's shuffled order.
    ///
    /// Every batch has `batch_size` rows except the last, which also takes
    /// the `n_items % batch_size` leftovers. A mixture of K components
    /// cannot be fit on a handful of leftover rows in high dimension.
    pub fn batch_ranges(&self, n_items: usize) -> Vec<Range<usize>> {
        let size = self.batch_size.max(1);
        let count = self.batches_per_epoch(n_items);
        (0..count)
            .map(|b| {
                let start = b * size;
                let end = if b + 1 == count { n_items } else { start + size };
                start..end
            })
            .collect()
    }

    /// Check hyperparameters, and batch sizing against `n_items` when given.
    pub fn validate(&self, n_items: Option<usize>) -> Result<()> {
        if self.n_clusters < 1 {
            return Err(Error::config("n_clusters", "must be >= 1"));
        }
        if self.dim < 1 {
            return Err(Error::config("dim", "must be >= 1"));
        }
        if self.batch_size < 1 {
            return Err(Error::config("batch_size", "must be >= 1"));
        }
        if self.batch_size < self.n_clusters {
            return Err(Error::config(
                "batch_size",
                format!(
                    "{} is smaller than n_clusters {}",
                    self.batch_size, self.n_clusters
                ),
            ));
        }
        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(Error::config("eps", "must lie in (0, 1)"));
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(Error::config("beta", "must be finite and > 0"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::config("dropout", "must lie in [0, 1)"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate", "must be finite and > 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::config("momentum", "must lie in [0, 1)"));
        }
        if self.kmeans_iters < 1 || self.eval_kmeans_iters < 1 {
            return Err(Error::config("kmeans_iters", "must be >= 1"));
        }
        if self.gmm_max_iter < 1 {
            return Err(Error::config("gmm_max_iter", "must be >= 1"));
        }
        if !(self.reg_covar.is_finite() && self.reg_covar >= 0.0) {
            return Err(Error::config("reg_covar", "must be finite and >= 0"));
        }
        if self.hidden_dims.contains(&0) {
            return Err(Error::config("hidden_dims", "layer widths must be >= 1"));
        }

        if let Some(n) = n_items {
            if self.batch_size > n {
                return Err(Error::config(
                    "batch_size",
                    format!("{} exceeds dataset size {}", self.batch_size, n),
                ));
            }
        }

        Ok(())
    }
}

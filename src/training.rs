//! Alternating embedding / mixture training.
//!
//! Each batch walks one pass of the step state machine:
//!
//! ```text
//! Idle → BatchReady → ClusterAssigned → MixtureRefit → LossComputed → ParametersUpdated → Idle
//! ```
//!
//! | Transition | Work |
//! |------------|------|
//! | → BatchReady | next shuffled batch drawn |
//! | → ClusterAssigned | K-means on the *raw* batch: labels and affinity |
//! | → MixtureRefit | network forward, mixture refit on the output, posteriors |
//! | → LossComputed | responsibilities, mixing weights `N_k/M`, loss and dL/dy |
//! | → ParametersUpdated | backprop into the network, one SGD step |
//!
//! Each epoch reshuffles the rows and cuts `n / batch_size` batches; rows
//! left over after the last full batch join it.
//!
//! Epochs run for a fixed budget. Any failure inside a step aborts the run
//! with [`Error::Training`] carrying the epoch, batch, and last state reached;
//! parameters keep whatever the last completed step wrote.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::prelude::*;
use tracing::{debug, info};

use crate::cluster::{mixing_weights, responsibilities, BatchedKMeans, Clustering, MixtureModel};
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::loss::MixtureLoss;
use crate::network::{EmbeddingNetwork, ForwardCache, Sgd};

/// Position of a batch in the step state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepState {
    /// Waiting for a batch.
    #[default]
    Idle,
    /// Batch drawn and validated.
    BatchReady,
    /// K-means labels and affinity computed.
    ClusterAssigned,
    /// Mixture refit on the network output.
    MixtureRefit,
    /// Loss and its gradient computed.
    LossComputed,
    /// Optimizer step applied.
    ParametersUpdated,
}

/// What one training step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Scalar loss.
    pub loss: f64,
    /// K-means labels on the raw batch.
    pub labels: Vec<usize>,
    /// Responsibilities, M×K.
    pub gamma: Array2<f64>,
    /// Mixing weights `N_k / M`.
    pub mixing_weights: Array1<f64>,
}

/// Per-epoch summary.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 0-based epoch.
    pub epoch: usize,
    /// Mean loss over the epoch's batches.
    pub mean_loss: f64,
    /// Number of batches run.
    pub batches: usize,
}

/// Owns the network, optimizer, and mixture for one run.
#[derive(Debug, Clone)]
pub struct TrainingLoop {
    config: ClusterConfig,
    network: EmbeddingNetwork,
    optimizer: Sgd,
    kmeans: BatchedKMeans,
    mixture: MixtureModel,
    loss: MixtureLoss,
    rng: StdRng,
    state: StepState,
}

impl TrainingLoop {
    /// Build a run from a validated configuration.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        config.validate(None)?;

        let network = EmbeddingNetwork::new(config.dim, &config.hidden_dims, config.dropout, config.seed);
        let optimizer = Sgd::new(&network, config.learning_rate, config.momentum);
        let kmeans = BatchedKMeans::new(config.n_clusters)
            .with_n_iter(config.kmeans_iters)
            .with_empty_cluster(config.empty_cluster);
        let mixture = MixtureModel::new(config.n_clusters)
            .with_max_iter(config.gmm_max_iter)
            .with_tol(config.gmm_tol)
            .with_reg_covar(config.reg_covar)
            .with_eps(config.eps)
            .with_seed(config.seed);
        let loss = MixtureLoss::new(config.beta, config.n_clusters, config.eps);
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));

        Ok(Self {
            config,
            network,
            optimizer,
            kmeans,
            mixture,
            loss,
            rng,
            state: StepState::Idle,
        })
    }

    /// Run every configured epoch over `data` (N×D).
    pub fn fit(&mut self, data: ArrayView2<'_, f32>) -> Result<Vec<EpochReport>> {
        self.check_data(data)?;
        info!(
            nodes = data.nrows(),
            dim = data.ncols(),
            clusters = self.config.n_clusters,
            epochs = self.config.epochs,
            parameters = self.network.parameters(),
            "starting training"
        );
        (0..self.config.epochs)
            .map(|epoch| self.run_epoch(data, epoch))
            .collect()
    }

    /// One shuffled pass over `data`.
    pub fn run_epoch(&mut self, data: ArrayView2<'_, f32>, epoch: usize) -> Result<EpochReport> {
        self.check_data(data)?;
        self.network.set_training(true);

        let mut order: Vec<usize> = (0..data.nrows()).collect();
        order.shuffle(&mut self.rng);

        let ranges = self.config.batch_ranges(data.nrows());
        let mut losses = Vec::with_capacity(ranges.len());
        for (batch_idx, range) in ranges.into_iter().enumerate() {
            let batch = data.select(Axis(0), &order[range]);
            let outcome = self.step(batch.view()).map_err(|source| Error::Training {
                epoch,
                batch: batch_idx,
                state: self.state,
                source: Box::new(source),
            })?;
            debug!(
                epoch,
                batch = batch_idx,
                loss = outcome.loss,
                mixing = %outcome.mixing_weights,
                "step complete"
            );
            losses.push(outcome.loss);
            self.state = StepState::Idle;
        }

        let mean_loss = losses.iter().sum::<f64>() / losses.len().max(1) as f64;
        info!(epoch, mean_loss, batches = losses.len(), "epoch complete");
        Ok(EpochReport {
            epoch,
            mean_loss,
            batches: losses.len(),
        })
    }

    /// Drive one batch through the state machine.
    pub fn step(&mut self, batch: ArrayView2<'_, f32>) -> Result<StepOutcome> {
        self.state = StepState::Idle;
        if batch.ncols() != self.config.dim {
            return Err(Error::DimensionMismatch {
                expected: self.config.dim,
                found: batch.ncols(),
            });
        }
        self.state = StepState::BatchReady;

        let assignment = self.kmeans.assign(batch)?;
        self.state = StepState::ClusterAssigned;

        let (output, cache) = self.network.forward(batch)?;
        if let Some(((i, d), v)) = output.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::unstable("network output", format!("y[{i}, {d}] = {v}")));
        }
        // Snapshot the refit mixture: the loss reads it but never differentiates through it.
        let frozen = self.mixture.fit(output.view())?.clone();
        let probs = self.mixture.predict_proba(output.view())?;
        self.state = StepState::MixtureRefit;

        // The K-means affinity weights the posteriors; the loss uses N_k / M instead.
        let affinity = assignment.affinity.mapv(f64::from);
        let gamma = responsibilities(affinity.view(), probs.view())?;
        let mixing = mixing_weights(gamma.view())?;
        let loss = self.loss.evaluate(output.view(), &frozen, mixing.view())?;
        self.state = StepState::LossComputed;

        self.update_parameters(&cache, loss.grad.view())?;

        Ok(StepOutcome {
            loss: loss.value,
            labels: assignment.labels,
            gamma,
            mixing_weights: mixing,
        })
    }

    /// Backpropagate `grad_output` (dL/dy) and apply one optimizer step.
    ///
    /// Gradients are checked before the optimizer runs, so a non-finite
    /// gradient leaves every parameter untouched.
    pub(crate) fn update_parameters(
        &mut self,
        cache: &ForwardCache,
        grad_output: ArrayView2<'_, f32>,
    ) -> Result<()> {
        let grads = self.network.backward(cache, grad_output)?;
        self.optimizer.step(&mut self.network, grads)?;
        self.state = StepState::ParametersUpdated;
        Ok(())
    }

    /// Embed `data` with dropout disabled.
    pub fn embed(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.network.embed(data)
    }

    /// Final hard assignment: K-means with the evaluation iteration budget
    /// on the embedded dataset.
    pub fn assign_clusters(&self, data: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        let embedded = self.embed(data)?;
        BatchedKMeans::new(self.config.n_clusters)
            .with_n_iter(self.config.eval_kmeans_iters)
            .with_empty_cluster(self.config.empty_cluster)
            .fit_predict(embedded.view())
    }

    /// Current state machine position.
    pub fn state(&self) -> StepState {
        self.state
    }

    /// The run configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// The embedding network.
    pub fn network(&self) -> &EmbeddingNetwork {
        &self.network
    }

    #[cfg(test)]
    pub(crate) fn network_mut(&mut self) -> &mut EmbeddingNetwork {
        &mut self.network
    }

    /// The mixture as of the latest step.
    pub fn mixture(&self) -> &MixtureModel {
        &self.mixture
    }

    fn check_data(&self, data: ArrayView2<'_, f32>) -> Result<()> {
        if data.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        if data.ncols() != self.network.dim() {
            return Err(Error::config(
                "dim",
                format!(
                    "vectors have {} columns but the network expects {}",
                    data.ncols(),
                    self.network.dim()
                ),
            ));
        }
        self.config.validate(Some(data.nrows()))
    }
}

//! # embed-gmm
//!
//! Unsupervised community detection over precomputed node vectors by
//! alternating two models: a feed-forward network that refines the vectors,
//! and a diagonal Gaussian mixture fit on the refined space whose
//! likelihood trains the network.
//!
//! ```text
//! node vectors ─► K-means (raw batch) ─► affinity ┐
//!        │                                        ├─► γ ─► N_k/M ─► loss ─► SGD
//!        └──────► network ─► GMM refit ─► p(k|y) ─┘
//! ```
//!
//! Where the vectors come from (a random-walk embedding tool) and how the
//! final labels are scored are outside the core; [`store`] and [`metrics`]
//! cover the file contract and the score.

pub mod cluster;
pub mod config;
/// Error types used across `embed-gmm`.
pub mod error;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod store;
pub mod training;


pub use cluster::{
    BatchedKMeans, ClusterAssignment, Clustering, MixtureModel, MixtureParameters, SoftClustering,
};
pub use config::{ClusterConfig, EmptyClusterPolicy};
pub use error::{Error, Result};
pub use loss::{LossOutput, MixtureLoss};
pub use metrics::{ari, nmi};
pub use network::EmbeddingNetwork;
pub use store::{read_labels, VectorStore};
pub use training::{EpochReport, StepOutcome, StepState, TrainingLoop};

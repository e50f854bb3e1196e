//! Clustering over batches of node vectors.
//!
//! ## Hard vs Soft Clustering
//!
//! **Hard clustering** assigns each row to exactly one cluster. K-means does
//! this on the raw batch at the start of every training step.
//!
//! **Soft clustering** gives each row a distribution over clusters. The
//! Gaussian mixture does this on the *network output*, and its posteriors
//! drive the loss.
//!
//! ## Algorithms
//!
//! ### Batched K-means
//!
//! Lloyd iterations seeded with the first K rows of the batch. Besides hard
//! labels it returns an affinity matrix `1 - normalize(distances)`.
//!
//! ### Gaussian Mixture Model (GMM)
//!
//! ```text
//! P(x) = Σ π_k × N(x | μ_k, diag(σ²_k))
//! ```
//!
//! Fit by EM from scratch on every call; diagonal covariance keeps both
//! steps closed-form.
//!
//! ### Responsibilities
//!
//! Recombine weights and posteriors into row-normalized responsibilities
//! `γ`, then into mixing weights `N_k / M`.
//!
//! ## Usage
//!
//! ```rust
//! use embed_gmm::cluster::{BatchedKMeans, MixtureModel, Clustering};
//! use ndarray::array;
//!
//! let data = array![
//!     [0.0f32, 0.0],
//!     [10.0, 10.0],
//!     [0.1, 0.1],
//!     [10.1, 10.1],
//! ];
//!
//! let labels = BatchedKMeans::new(2).fit_predict(data.view()).unwrap();
//! assert_eq!(labels, vec![0, 1, 0, 1]);
//!
//! let mut gmm = MixtureModel::new(2).with_seed(7);
//! gmm.fit(data.view()).unwrap();
//! let probs = gmm.predict_proba(data.view()).unwrap();
//! assert_eq!(probs.dim(), (4, 2));
//! ```

mod gmm;
mod kmeans;
pub mod responsibility;
mod traits;

pub use gmm::{MixtureModel, MixtureParameters, VARIANCE_FLOOR};
pub use kmeans::{argmin_rows, normalize, squared_distances, BatchedKMeans, ClusterAssignment};
pub use responsibility::{mixing_weights, responsibilities};
pub use traits::{Clustering, SoftClustering};

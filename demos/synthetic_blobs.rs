use embed_gmm::{ari, nmi, ClusterConfig, EmptyClusterPolicy, TrainingLoop};
use ndarray::Array2;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Minimal end-to-end: synthetic node vectors -> joint training -> final K-means.
    //
    // Three Gaussian blobs in 16 dimensions stand in for random-walk embeddings.
    let (k, per, dim) = (3, 100, 16);
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0f32, 0.6)?;

    let centers = Array2::from_shape_fn((k, dim), |_| rng.random_range(-4.0f32..4.0));
    let mut data = Array2::zeros((k * per, dim));
    let mut truth = Vec::with_capacity(k * per);
    for (i, mut row) in data.rows_mut().into_iter().enumerate() {
        let c = i % k;
        truth.push(c);
        for (d, v) in row.iter_mut().enumerate() {
            *v = centers[[c, d]] + noise.sample(&mut rng);
        }
    }

    let config = ClusterConfig::default()
        .with_dim(dim)
        .with_n_clusters(k)
        .with_batch_size(60)
        .with_epochs(5)
        .with_hidden_dims(vec![64, 32])
        .with_empty_cluster(EmptyClusterPolicy::KeepPrevious);

    let mut run = TrainingLoop::new(config)?;
    for report in run.fit(data.view())? {
        println!("epoch {} mean_loss={:.6}", report.epoch, report.mean_loss);
    }

    let labels = run.assign_clusters(data.view())?;
    println!("nmi={:.4} ari={:.4}", nmi(&labels, &truth), ari(&labels, &truth));

    Ok(())
}

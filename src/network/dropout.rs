//! Inverted dropout.

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::Rng;

/// Zeroes activations with probability `p` and scales survivors by `1/(1-p)`.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Dropout with rate `p` in `[0, 1)`.
    pub fn new(p: f32) -> Self {
        Self { p }
    }

    /// Drop rate.
    pub fn rate(&self) -> f32 {
        self.p
    }

    /// Draw a fresh mask: each entry is 0 or `1/(1-p)`.
    pub(crate) fn mask(&self, shape: (usize, usize), rng: &mut StdRng) -> Array2<f32> {
        if self.p <= 0.0 {
            return Array2::ones(shape);
        }
        let keep = 1.0 - self.p;
        let scale = 1.0 / keep;
        Array2::from_shape_fn(shape, |_| if rng.random::<f32>() < keep { scale } else { 0.0 })
    }

    /// Apply a mask drawn by [`Dropout::mask`].
    pub(crate) fn apply(input: ArrayView2<'_, f32>, mask: &Array2<f32>) -> Array2<f32> {
        &input * mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_mask_values_and_rate() {
        let mut rng = StdRng::seed_from_u64(3);
        let mask = Dropout::new(0.25).mask((200, 50), &mut rng);
        let dropped = mask.iter().filter(|&&v| v == 0.0).count() as f32 / mask.len() as f32;
        assert!(mask.iter().all(|&v| v == 0.0 || (v - 1.0 / 0.75).abs() < 1e-6));
        assert!((dropped - 0.25).abs() < 0.03, "drop fraction {dropped}");
    }

    #[test]
    fn test_zero_rate_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let mask = Dropout::new(0.0).mask((4, 4), &mut rng);
        assert!(mask.iter().all(|&v| v == 1.0));
    }
}

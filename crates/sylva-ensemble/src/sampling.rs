//! Seeded resampling helpers shared by bagging and feature analysis.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Number of rows a bootstrap draw takes: `⌊n · ratio⌋`, at least 1.
#[must_use]
pub fn bootstrap_draw_count(n_samples: usize, subsample_ratio: f64) -> usize {
    ((n_samples as f64 * subsample_ratio).floor() as usize).max(1)
}

/// Draw `draw_count` row indices uniformly with replacement.
pub(crate) fn bootstrap_indices(
    n_samples: usize,
    draw_count: usize,
    rng: &mut impl Rng,
) -> Vec<usize> {
    (0..draw_count).map(|_| rng.gen_range(0..n_samples)).collect()
}

/// Seeded bootstrap sample of `⌊n · subsample_ratio⌋` row indices.
///
/// The same `(n_samples, subsample_ratio, seed)` always yields the same
/// index set. Returns an empty vector when `n_samples` is 0.
#[must_use]
pub fn create_bootstrap_sample(n_samples: usize, subsample_ratio: f64, seed: u64) -> Vec<usize> {
    if n_samples == 0 {
        return Vec::new();
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    bootstrap_indices(
        n_samples,
        bootstrap_draw_count(n_samples, subsample_ratio),
        &mut rng,
    )
}

/// Gather rows and targets at `indices`.
pub(crate) fn gather(
    features: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let rows = indices.iter().map(|&i| features[i].clone()).collect();
    let labels = indices.iter().map(|&i| targets[i]).collect();
    (rows, labels)
}

/// Scale `weights` in place to sum to 1.
///
/// Falls back to uniform weights when the sum is zero or not finite.
pub(crate) fn normalize(weights: &mut [f64]) {
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        weights.iter_mut().for_each(|w| *w /= sum);
    } else if !weights.is_empty() {
        let uniform = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = uniform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_indices() {
        let a = create_bootstrap_sample(100, 0.8, 7);
        let b = create_bootstrap_sample(100, 0.8, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 80);
        assert!(a.iter().all(|&i| i < 100));
    }

    #[test]
    fn different_seed_different_indices() {
        assert_ne!(
            create_bootstrap_sample(100, 1.0, 1),
            create_bootstrap_sample(100, 1.0, 2)
        );
    }

    #[test]
    fn draw_count_floors_and_keeps_one() {
        assert_eq!(bootstrap_draw_count(10, 0.55), 5);
        assert_eq!(bootstrap_draw_count(3, 0.1), 1);
    }

    #[test]
    fn normalize_sums_to_one() {
        let mut w = vec![2.0, 6.0];
        normalize(&mut w);
        assert!((w[0] - 0.25).abs() < 1e-12);
        let mut zeros = vec![0.0; 4];
        normalize(&mut zeros);
        assert!(zeros.iter().all(|&v| (v - 0.25).abs() < 1e-12));
    }

    #[test]
    fn gather_follows_indices() {
        let (rows, labels) = gather(&[vec![1.0], vec![2.0]], &[0.0, 1.0], &[1, 1, 0]);
        assert_eq!(rows, vec![vec![2.0], vec![2.0], vec![1.0]]);
        assert_eq!(labels, vec![1.0, 1.0, 0.0]);
    }
}

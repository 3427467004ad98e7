//! The trainable-model seam shared by every ensemble member.

use std::borrow::Cow;
use std::fmt;

use crate::error::EnsembleError;

/// Step used by [`finite_difference_gradient`].
pub const FINITE_DIFFERENCE_STEP: f64 = 1e-3;

/// Summary of a single `fit` call.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FitHistory {
    /// Number of optimisation passes over the data (1 for trees).
    pub epochs: usize,
    /// Weighted mean squared error on the training data after fitting.
    pub final_loss: f64,
}

/// Anything that maps a feature vector to a scalar score.
pub trait Predictor: Send + Sync {
    /// Number of input features the model expects.
    fn n_features(&self) -> usize;

    /// Whether the model has been fitted.
    fn is_fitted(&self) -> bool;

    /// Predict the score for one sample.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::NotTrained`] before fitting,
    /// [`EnsembleError::PredictionFeatureMismatch`] on a width mismatch.
    fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError>;

    /// Predict scores for a batch of samples.
    ///
    /// # Errors
    ///
    /// Same as [`Predictor::predict_one`].
    fn predict_batch(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, EnsembleError> {
        features.iter().map(|s| self.predict_one(s)).collect()
    }

    /// Gradient of the score with respect to the input.
    ///
    /// Defaults to central finite differences; differentiable models
    /// override this with the analytic gradient.
    ///
    /// # Errors
    ///
    /// Same as [`Predictor::predict_one`].
    fn input_gradient(&self, sample: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        finite_difference_gradient(self, sample, FINITE_DIFFERENCE_STEP)
    }
}

/// A model that can be trained on (optionally weighted) samples.
pub trait Learner: Predictor + fmt::Debug {
    /// Short human-readable model name used in logs.
    fn name(&self) -> &'static str;

    /// Fit the model in place, replacing any previous fit.
    ///
    /// `sample_weights`, when given, must be parallel to `features`.
    ///
    /// # Errors
    ///
    /// Data errors for malformed input, configuration errors for invalid
    /// hyperparameters.
    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<FitHistory, EnsembleError>;

    /// An unfitted copy with the same hyperparameters.
    fn fresh(&self) -> Box<dyn Learner>;

    /// Replace the seed used by any randomised part of `fit`.
    fn set_seed(&mut self, seed: u64);

    /// Number of parameters (or nodes) in the fitted model; 0 when unfitted.
    fn model_size(&self) -> usize;
}

/// Central-difference estimate of `∂f/∂x` at `sample`.
///
/// # Errors
///
/// Propagates prediction errors.
pub fn finite_difference_gradient<P: Predictor + ?Sized>(
    model: &P,
    sample: &[f64],
    step: f64,
) -> Result<Vec<f64>, EnsembleError> {
    let mut perturbed = sample.to_vec();
    let mut gradient = Vec::with_capacity(sample.len());
    for j in 0..sample.len() {
        perturbed[j] = sample[j] + step;
        let up = model.predict_one(&perturbed)?;
        perturbed[j] = sample[j] - step;
        let down = model.predict_one(&perturbed)?;
        perturbed[j] = sample[j];
        gradient.push((up - down) / (2.0 * step));
    }
    Ok(gradient)
}

/// Resolve optional sample weights to a slice of length `n_samples`.
///
/// Missing weights become uniform ones.
pub(crate) fn resolve_weights(
    sample_weights: Option<&[f64]>,
    n_samples: usize,
) -> Result<Cow<'_, [f64]>, EnsembleError> {
    match sample_weights {
        None => Ok(Cow::Owned(vec![1.0; n_samples])),
        Some(w) => {
            if w.len() != n_samples {
                return Err(EnsembleError::WeightCountMismatch {
                    n_weights: w.len(),
                    n_samples,
                });
            }
            if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(EnsembleError::InvalidParameter {
                    name: "sample_weights",
                    reason: "weights must be finite and non-negative".into(),
                });
            }
            Ok(Cow::Borrowed(w))
        }
    }
}

/// Weighted mean squared error; 0 when the total weight is zero.
pub(crate) fn weighted_mse(predictions: &[f64], targets: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets)
        .zip(weights)
        .map(|((p, t), w)| w * (p - t) * (p - t))
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl Predictor for Quadratic {
        fn n_features(&self) -> usize {
            2
        }
        fn is_fitted(&self) -> bool {
            true
        }
        fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
            Ok(sample[0] * sample[0] + 3.0 * sample[1])
        }
    }

    #[test]
    fn finite_difference_matches_analytic() {
        let g = Quadratic.input_gradient(&[2.0, -1.0]).unwrap();
        assert!((g[0] - 4.0).abs() < 1e-6);
        assert!((g[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_weights_are_uniform() {
        let w = resolve_weights(None, 3).unwrap();
        assert_eq!(w.as_ref(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn weight_count_checked() {
        let err = resolve_weights(Some(&[1.0]), 2).unwrap_err();
        assert!(matches!(err, EnsembleError::WeightCountMismatch { .. }));
    }

    #[test]
    fn negative_weight_rejected() {
        assert!(resolve_weights(Some(&[1.0, -0.5]), 2).is_err());
    }

    #[test]
    fn weighted_mse_ignores_zero_weight() {
        let mse = weighted_mse(&[0.0, 10.0], &[1.0, 0.0], &[1.0, 0.0]);
        assert!((mse - 1.0).abs() < 1e-12);
    }
}

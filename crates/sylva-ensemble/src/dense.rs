//! Small differentiable learners trained by full-batch gradient descent.
//!
//! Both models squash their output through a sigmoid, so targets are
//! expected in `[0, 1]`; values outside are clamped before fitting.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::dataset::{validate_features, validate_labels};
use crate::error::EnsembleError;
use crate::learner::{FitHistory, Learner, Predictor, resolve_weights, weighted_mse};

pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn check_sample(expected: usize, sample: &[f64]) -> Result<(), EnsembleError> {
    if sample.len() != expected {
        return Err(EnsembleError::PredictionFeatureMismatch {
            expected,
            got: sample.len(),
        });
    }
    Ok(())
}

fn validate_training(
    features: &[Vec<f64>],
    targets: &[f64],
    epochs: usize,
    learning_rate: f64,
) -> Result<(usize, Vec<f64>), EnsembleError> {
    let n_features = validate_features(features)?;
    validate_labels(targets, features.len())?;
    if epochs == 0 {
        return Err(EnsembleError::InvalidParameter {
            name: "epochs",
            reason: "must be at least 1".into(),
        });
    }
    if !learning_rate.is_finite() || learning_rate <= 0.0 {
        return Err(EnsembleError::InvalidParameter {
            name: "learning_rate",
            reason: format!("must be finite and > 0, got {learning_rate}"),
        });
    }
    let clamped = targets.iter().map(|t| t.clamp(0.0, 1.0)).collect();
    Ok((n_features, clamped))
}

/// A single dense unit with sigmoid activation: `σ(w·x + b)`.
///
/// Fitted by minimising weighted binary cross-entropy.
#[derive(Debug, Clone)]
pub struct LogisticUnit {
    epochs: usize,
    learning_rate: f64,
    seed: u64,
    weights: Vec<f64>,
    bias: f64,
    fitted: bool,
}

impl LogisticUnit {
    /// Create an unfitted unit: 200 epochs, learning rate 0.5, seed 42.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.5,
            seed: 42,
            weights: Vec::new(),
            bias: 0.0,
            fitted: false,
        }
    }

    /// Set the number of gradient-descent epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the initialisation seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the fitted weights and bias.
    #[must_use]
    pub fn params(&self) -> (&[f64], f64) {
        (&self.weights, self.bias)
    }

    fn logit(&self, sample: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(sample)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
}

impl Default for LogisticUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor for LogisticUnit {
    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
        if !self.fitted {
            return Err(EnsembleError::NotTrained {
                operation: "logistic predict",
            });
        }
        check_sample(self.weights.len(), sample)?;
        Ok(sigmoid(self.logit(sample)))
    }

    fn input_gradient(&self, sample: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        let p = self.predict_one(sample)?;
        let scale = p * (1.0 - p);
        Ok(self.weights.iter().map(|w| scale * w).collect())
    }
}

impl Learner for LogisticUnit {
    fn name(&self) -> &'static str {
        "logistic_unit"
    }

    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<FitHistory, EnsembleError> {
        let (n_features, targets) =
            validate_training(features, targets, self.epochs, self.learning_rate)?;
        let weights = resolve_weights(sample_weights, features.len())?;
        let total: f64 = weights.iter().sum::<f64>().max(f64::MIN_POSITIVE);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.weights = (0..n_features).map(|_| rng.gen_range(-0.1..0.1)).collect();
        self.bias = 0.0;
        self.fitted = true;

        let mut grad_w = vec![0.0; n_features];
        for _ in 0..self.epochs {
            grad_w.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0;
            for ((row, &t), &w) in features.iter().zip(&targets).zip(weights.iter()) {
                let diff = w * (sigmoid(self.logit(row)) - t);
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g += diff * x;
                }
                grad_b += diff;
            }
            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g / total;
            }
            self.bias -= self.learning_rate * grad_b / total;
        }

        let predictions = self.predict_batch(features)?;
        let final_loss = weighted_mse(&predictions, &targets, &weights);
        debug!(epochs = self.epochs, final_loss, "logistic unit fitted");
        Ok(FitHistory {
            epochs: self.epochs,
            final_loss,
        })
    }

    fn fresh(&self) -> Box<dyn Learner> {
        Box::new(
            LogisticUnit::new()
                .with_epochs(self.epochs)
                .with_learning_rate(self.learning_rate)
                .with_seed(self.seed),
        )
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn model_size(&self) -> usize {
        if self.fitted { self.weights.len() + 1 } else { 0 }
    }
}

/// A `tanh` hidden layer feeding a single sigmoid output.
///
/// Fitted by minimising weighted mean squared error.
#[derive(Debug, Clone)]
pub struct TwoLayerRegressor {
    hidden_units: usize,
    epochs: usize,
    learning_rate: f64,
    seed: u64,
    n_features: usize,
    /// `hidden_units × n_features`, row-major.
    input_weights: Vec<f64>,
    hidden_bias: Vec<f64>,
    output_weights: Vec<f64>,
    output_bias: f64,
    fitted: bool,
}

impl TwoLayerRegressor {
    /// Create an unfitted regressor with `hidden_units` tanh units:
    /// 200 epochs, learning rate 0.5, seed 42.
    #[must_use]
    pub fn new(hidden_units: usize) -> Self {
        Self {
            hidden_units,
            epochs: 200,
            learning_rate: 0.5,
            seed: 42,
            n_features: 0,
            input_weights: Vec::new(),
            hidden_bias: Vec::new(),
            output_weights: Vec::new(),
            output_bias: 0.0,
            fitted: false,
        }
    }

    /// Set the number of gradient-descent epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the initialisation seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn hidden(&self, sample: &[f64]) -> Vec<f64> {
        (0..self.hidden_units)
            .map(|k| {
                let row = &self.input_weights[k * self.n_features..(k + 1) * self.n_features];
                let z: f64 = row.iter().zip(sample).map(|(w, x)| w * x).sum();
                (z + self.hidden_bias[k]).tanh()
            })
            .collect()
    }

    fn output(&self, hidden: &[f64]) -> f64 {
        let z: f64 = self
            .output_weights
            .iter()
            .zip(hidden)
            .map(|(v, h)| v * h)
            .sum();
        sigmoid(z + self.output_bias)
    }
}

impl Predictor for TwoLayerRegressor {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
        if !self.fitted {
            return Err(EnsembleError::NotTrained {
                operation: "regressor predict",
            });
        }
        check_sample(self.n_features, sample)?;
        Ok(self.output(&self.hidden(sample)))
    }

    fn input_gradient(&self, sample: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        let y = self.predict_one(sample)?;
        let hidden = self.hidden(sample);
        let dy = y * (1.0 - y);
        let mut gradient = vec![0.0; self.n_features];
        for (k, h) in hidden.iter().enumerate() {
            let back = dy * self.output_weights[k] * (1.0 - h * h);
            let row = &self.input_weights[k * self.n_features..(k + 1) * self.n_features];
            for (g, w) in gradient.iter_mut().zip(row) {
                *g += back * w;
            }
        }
        Ok(gradient)
    }
}

impl Learner for TwoLayerRegressor {
    fn name(&self) -> &'static str {
        "two_layer_regressor"
    }

    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<FitHistory, EnsembleError> {
        let (n_features, targets) =
            validate_training(features, targets, self.epochs, self.learning_rate)?;
        if self.hidden_units == 0 {
            return Err(EnsembleError::InvalidParameter {
                name: "hidden_units",
                reason: "must be at least 1".into(),
            });
        }
        let weights = resolve_weights(sample_weights, features.len())?;
        let total: f64 = weights.iter().sum::<f64>().max(f64::MIN_POSITIVE);

        let h = self.hidden_units;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let limit = (6.0 / (n_features + h) as f64).sqrt();
        self.n_features = n_features;
        self.input_weights = (0..h * n_features)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        self.hidden_bias = vec![0.0; h];
        let out_limit = (6.0 / (h + 1) as f64).sqrt();
        self.output_weights = (0..h).map(|_| rng.gen_range(-out_limit..out_limit)).collect();
        self.output_bias = 0.0;
        self.fitted = true;

        let mut g_in = vec![0.0; h * n_features];
        let mut g_hb = vec![0.0; h];
        let mut g_out = vec![0.0; h];
        for _ in 0..self.epochs {
            g_in.iter_mut().for_each(|g| *g = 0.0);
            g_hb.iter_mut().for_each(|g| *g = 0.0);
            g_out.iter_mut().for_each(|g| *g = 0.0);
            let mut g_ob = 0.0;

            for ((row, &t), &w) in features.iter().zip(&targets).zip(weights.iter()) {
                let hidden = self.hidden(row);
                let y = self.output(&hidden);
                let delta_out = 2.0 * w * (y - t) * y * (1.0 - y);
                g_ob += delta_out;
                for k in 0..h {
                    g_out[k] += delta_out * hidden[k];
                    let delta_h = delta_out * self.output_weights[k] * (1.0 - hidden[k] * hidden[k]);
                    g_hb[k] += delta_h;
                    for (j, x) in row.iter().enumerate() {
                        g_in[k * n_features + j] += delta_h * x;
                    }
                }
            }

            let step = self.learning_rate / total;
            for (p, g) in self.input_weights.iter_mut().zip(&g_in) {
                *p -= step * g;
            }
            for (p, g) in self.hidden_bias.iter_mut().zip(&g_hb) {
                *p -= step * g;
            }
            for (p, g) in self.output_weights.iter_mut().zip(&g_out) {
                *p -= step * g;
            }
            self.output_bias -= step * g_ob;
        }

        let predictions = self.predict_batch(features)?;
        let final_loss = weighted_mse(&predictions, &targets, &weights);
        debug!(epochs = self.epochs, hidden_units = h, final_loss, "regressor fitted");
        Ok(FitHistory {
            epochs: self.epochs,
            final_loss,
        })
    }

    fn fresh(&self) -> Box<dyn Learner> {
        Box::new(
            TwoLayerRegressor::new(self.hidden_units)
                .with_epochs(self.epochs)
                .with_learning_rate(self.learning_rate)
                .with_seed(self.seed),
        )
    }

    fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    fn model_size(&self) -> usize {
        if self.fitted {
            self.input_weights.len() + self.hidden_bias.len() + self.output_weights.len() + 1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::finite_difference_gradient;

    fn threshold_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 40.0]).collect();
        let targets = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        (features, targets)
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn logistic_learns_increasing_trend() {
        let (features, targets) = threshold_data();
        let mut unit = LogisticUnit::new().with_epochs(500).with_learning_rate(2.0);
        unit.fit(&features, &targets, None).unwrap();
        let low = unit.predict_one(&[0.05]).unwrap();
        let high = unit.predict_one(&[0.95]).unwrap();
        assert!(high > low, "low = {low}, high = {high}");
        assert!(unit.params().0[0] > 0.0);
    }

    #[test]
    fn logistic_gradient_matches_finite_difference() {
        let (features, targets) = threshold_data();
        let mut unit = LogisticUnit::new();
        unit.fit(&features, &targets, None).unwrap();
        let analytic = unit.input_gradient(&[0.3]).unwrap();
        let numeric = finite_difference_gradient(&unit, &[0.3], 1e-5).unwrap();
        assert!((analytic[0] - numeric[0]).abs() < 1e-6);
    }

    #[test]
    fn regressor_gradient_matches_finite_difference() {
        let features: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![i as f64 / 30.0, 1.0 - i as f64 / 30.0])
            .collect();
        let targets: Vec<f64> = (0..30).map(|i| (i as f64 / 30.0).powi(2)).collect();
        let mut model = TwoLayerRegressor::new(4).with_epochs(50);
        model.fit(&features, &targets, None).unwrap();
        let x = [0.4, 0.7];
        let analytic = model.input_gradient(&x).unwrap();
        let numeric = finite_difference_gradient(&model, &x, 1e-5).unwrap();
        for (a, n) in analytic.iter().zip(&numeric) {
            assert!((a - n).abs() < 1e-6, "analytic {a} vs numeric {n}");
        }
    }

    #[test]
    fn regressor_reduces_loss() {
        let (features, targets) = threshold_data();
        let mut short = TwoLayerRegressor::new(8).with_epochs(1);
        let mut long = TwoLayerRegressor::new(8).with_epochs(400).with_learning_rate(2.0);
        let before = short.fit(&features, &targets, None).unwrap().final_loss;
        let after = long.fit(&features, &targets, None).unwrap().final_loss;
        assert!(after < before, "before = {before}, after = {after}");
    }

    #[test]
    fn unfitted_predict_is_state_error() {
        assert!(matches!(
            LogisticUnit::new().predict_one(&[1.0]).unwrap_err(),
            EnsembleError::NotTrained { .. }
        ));
        assert!(matches!(
            TwoLayerRegressor::new(2).predict_one(&[1.0]).unwrap_err(),
            EnsembleError::NotTrained { .. }
        ));
    }

    #[test]
    fn fitting_is_deterministic() {
        let (features, targets) = threshold_data();
        let mut a = TwoLayerRegressor::new(3).with_seed(7);
        let mut b = TwoLayerRegressor::new(3).with_seed(7);
        a.fit(&features, &targets, None).unwrap();
        b.fit(&features, &targets, None).unwrap();
        assert_eq!(a.predict_one(&[0.3]).unwrap(), b.predict_one(&[0.3]).unwrap());
    }

    #[test]
    fn zero_epochs_rejected() {
        let (features, targets) = threshold_data();
        let err = LogisticUnit::new()
            .with_epochs(0)
            .fit(&features, &targets, None)
            .unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidParameter { name: "epochs", .. }));
    }
}

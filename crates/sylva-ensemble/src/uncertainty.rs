//! Ensemble disagreement scores and probability calibration.
//!
//! Every input here is a `member_predictions[member][sample]` matrix of raw
//! scores. Variance is taken on the raw scores. Entropy and mutual
//! information read each score as the probability `p` of the positive class
//! of a binary distribution `[p, 1 − p]`, after mapping the handler's score
//! range onto `[0, 1]`.

use std::f64::consts::LN_2;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CalibrationMethod, UncertaintyConfig, UncertaintyMethod};
use crate::dataset::validate_labels;
use crate::dense::{LogisticUnit, TwoLayerRegressor};
use crate::error::EnsembleError;
use crate::learner::{Learner, Predictor};

/// Guard inside `ln(p + ε)`.
const LOG_EPSILON: f64 = 1e-10;

const DEFAULT_SCORE_RANGE: (f64, f64) = (0.0, 1.0);

/// Disagreement summary of one batch (or one sample).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UncertaintyMetrics {
    /// Entropy of the mean prediction, in nats.
    pub entropy: f64,
    /// Population variance of the raw member scores.
    pub variance: f64,
    /// `1 − entropy / ln 2`, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Entropy of the mean minus the mean member entropy, floored at 0.
    pub mutual_information: f64,
}

/// A fitted calibration model.
#[derive(Debug, Clone)]
enum CalibrationModel {
    Platt(LogisticUnit),
    Isotonic(TwoLayerRegressor),
}

impl CalibrationModel {
    fn predictor(&self) -> &dyn Predictor {
        match self {
            CalibrationModel::Platt(m) => m,
            CalibrationModel::Isotonic(m) => m,
        }
    }
}

/// Binary entropy of `p` in nats, never negative.
fn binary_entropy(p: f64) -> f64 {
    let h = -(p * (p + LOG_EPSILON).ln() + (1.0 - p) * (1.0 - p + LOG_EPSILON).ln());
    h.max(0.0)
}

fn confidence_from_entropy(entropy: f64) -> f64 {
    (1.0 - entropy / LN_2).clamp(0.0, 1.0)
}

/// Check shape and finiteness; returns the number of samples.
fn validate_member_predictions(member_predictions: &[Vec<f64>]) -> Result<usize, EnsembleError> {
    let Some(first) = member_predictions.first() else {
        return Err(EnsembleError::EmptyDataset);
    };
    let n_samples = first.len();
    if n_samples == 0 {
        return Err(EnsembleError::EmptyDataset);
    }
    for (member, preds) in member_predictions.iter().enumerate() {
        if preds.len() != n_samples {
            return Err(EnsembleError::FeatureCountMismatch {
                expected: n_samples,
                got: preds.len(),
                sample_index: member,
            });
        }
        if let Some(sample) = preds.iter().position(|p| !p.is_finite()) {
            return Err(EnsembleError::NonFiniteValue {
                sample_index: member,
                feature_index: sample,
            });
        }
    }
    Ok(n_samples)
}

/// Per-sample metrics; assumes validated input.
fn sample_metrics(
    member_predictions: &[Vec<f64>],
    sample: usize,
    to_probability: impl Fn(f64) -> f64,
) -> UncertaintyMetrics {
    let n_members = member_predictions.len() as f64;
    let raw: Vec<f64> = member_predictions.iter().map(|p| p[sample]).collect();
    let raw_mean = raw.iter().sum::<f64>() / n_members;
    let variance = raw.iter().map(|p| (p - raw_mean).powi(2)).sum::<f64>() / n_members;

    let probs: Vec<f64> = raw.iter().map(|&p| to_probability(p)).collect();
    let mean = probs.iter().sum::<f64>() / n_members;
    let entropy = binary_entropy(mean);
    let member_entropy = probs.iter().map(|&p| binary_entropy(p)).sum::<f64>() / n_members;
    UncertaintyMetrics {
        entropy,
        variance,
        confidence: confidence_from_entropy(entropy),
        mutual_information: (entropy - member_entropy).max(0.0),
    }
}

/// Expected calibration error: bin-population-weighted `|confidence − accuracy|`.
///
/// Probabilities are clamped into `[0, 1]`; a label counts as positive when
/// it is above 0.5. Returns 0 for empty input or zero bins.
#[must_use]
pub fn expected_calibration_error(probabilities: &[f64], labels: &[f64], n_bins: usize) -> f64 {
    if probabilities.is_empty() || n_bins == 0 {
        return 0.0;
    }
    let mut bin_sums = vec![0.0; n_bins];
    let mut bin_correct = vec![0.0; n_bins];
    let mut bin_counts = vec![0usize; n_bins];

    for (&p, &label) in probabilities.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let bin = ((p * n_bins as f64) as usize).min(n_bins - 1);
        bin_sums[bin] += p;
        bin_correct[bin] += if label > 0.5 { 1.0 } else { 0.0 };
        bin_counts[bin] += 1;
    }

    let n = probabilities.len() as f64;
    (0..n_bins)
        .filter(|&i| bin_counts[i] > 0)
        .map(|i| {
            let count = bin_counts[i] as f64;
            (count / n) * (bin_sums[i] / count - bin_correct[i] / count).abs()
        })
        .sum()
}

/// Scores ensemble disagreement and owns the optional calibration model.
#[derive(Debug, Clone)]
pub struct UncertaintyHandler {
    config: UncertaintyConfig,
    calibration: Option<CalibrationModel>,
    score_range: (f64, f64),
}

impl UncertaintyHandler {
    /// Create a handler with no calibration model.
    ///
    /// # Errors
    ///
    /// Any error from [`UncertaintyConfig::validate`].
    pub fn new(config: UncertaintyConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        Ok(Self {
            config,
            calibration: None,
            score_range: DEFAULT_SCORE_RANGE,
        })
    }

    /// Set the raw scores that map to probability 0 and 1.
    ///
    /// Scores between `low` and `high` map linearly; scores outside clamp.
    /// Ensembles trained on class labels use the smallest and largest label.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::InvalidParameter`] unless both bounds are finite and
    /// `low < high`.
    pub fn set_score_range(&mut self, low: f64, high: f64) -> Result<(), EnsembleError> {
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(EnsembleError::InvalidParameter {
                name: "score_range",
                reason: format!("need finite low < high, got [{low}, {high}]"),
            });
        }
        self.score_range = (low, high);
        Ok(())
    }

    /// Return the `(low, high)` score range; `(0, 1)` by default.
    #[must_use]
    pub fn score_range(&self) -> (f64, f64) {
        self.score_range
    }

    fn to_probability(&self, score: f64) -> f64 {
        let (low, high) = self.score_range;
        ((score - low) / (high - low)).clamp(0.0, 1.0)
    }

    /// Scalar uncertainty of the batch, averaged over samples, using the
    /// configured [`UncertaintyMethod`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::EmptyDataset`] | No members or no samples |
    /// | [`EnsembleError::FeatureCountMismatch`] | Members disagree on the sample count |
    /// | [`EnsembleError::NonFiniteValue`] | A prediction is NaN or infinite |
    pub fn calculate_uncertainty(&self, member_predictions: &[Vec<f64>]) -> Result<f64, EnsembleError> {
        let metrics = self.metrics(member_predictions)?;
        Ok(match self.config.method {
            UncertaintyMethod::Entropy => metrics.entropy,
            UncertaintyMethod::Variance => metrics.variance,
            UncertaintyMethod::MutualInformation => metrics.mutual_information,
        })
    }

    /// All metrics averaged over the batch. Recomputed on every call.
    ///
    /// # Errors
    ///
    /// Same as [`UncertaintyHandler::calculate_uncertainty`].
    pub fn metrics(&self, member_predictions: &[Vec<f64>]) -> Result<UncertaintyMetrics, EnsembleError> {
        let per_sample = self.per_sample(member_predictions)?;
        let n = per_sample.len() as f64;
        let entropy = per_sample.iter().map(|m| m.entropy).sum::<f64>() / n;
        Ok(UncertaintyMetrics {
            entropy,
            variance: per_sample.iter().map(|m| m.variance).sum::<f64>() / n,
            confidence: confidence_from_entropy(entropy),
            mutual_information: per_sample.iter().map(|m| m.mutual_information).sum::<f64>() / n,
        })
    }

    /// Metrics for each sample.
    ///
    /// # Errors
    ///
    /// Same as [`UncertaintyHandler::calculate_uncertainty`].
    pub fn per_sample(
        &self,
        member_predictions: &[Vec<f64>],
    ) -> Result<Vec<UncertaintyMetrics>, EnsembleError> {
        let n_samples = validate_member_predictions(member_predictions)?;
        Ok((0..n_samples)
            .map(|s| sample_metrics(member_predictions, s, |p| self.to_probability(p)))
            .collect())
    }

    /// Fit the calibration model mapping raw scores to label frequencies.
    ///
    /// With [`CalibrationMethod::None`] no model is stored. Labels outside
    /// `[0, 1]` are clamped into it before fitting.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::EmptyDataset`] | No predictions |
    /// | [`EnsembleError::LabelCountMismatch`] | `labels.len() != predictions.len()` |
    /// | [`EnsembleError::NonFiniteLabel`] | A label is NaN or infinite |
    /// | [`EnsembleError::NonFiniteValue`] | A prediction is NaN or infinite |
    pub fn calibrate(&mut self, predictions: &[f64], labels: &[f64]) -> Result<(), EnsembleError> {
        if self.config.calibration_method == CalibrationMethod::None {
            self.calibration = None;
            return Ok(());
        }
        if predictions.is_empty() {
            return Err(EnsembleError::EmptyDataset);
        }
        validate_labels(labels, predictions.len())?;
        if let Some(i) = predictions.iter().position(|p| !p.is_finite()) {
            return Err(EnsembleError::NonFiniteValue {
                sample_index: i,
                feature_index: 0,
            });
        }
        if labels.iter().any(|l| !(0.0..=1.0).contains(l)) {
            warn!("calibration labels outside [0, 1] are clamped");
        }
        let labels: Vec<f64> = labels.iter().map(|l| l.clamp(0.0, 1.0)).collect();
        let rows: Vec<Vec<f64>> = predictions.iter().map(|&p| vec![p]).collect();

        let model = match self.config.calibration_method {
            CalibrationMethod::Platt => {
                let mut unit = LogisticUnit::new()
                    .with_epochs(self.config.epochs)
                    .with_learning_rate(self.config.learning_rate)
                    .with_seed(self.config.seed);
                unit.fit(&rows, &labels, None)?;
                CalibrationModel::Platt(unit)
            }
            CalibrationMethod::Isotonic => {
                let mut net = TwoLayerRegressor::new(self.config.hidden_units)
                    .with_epochs(self.config.epochs)
                    .with_learning_rate(self.config.learning_rate)
                    .with_seed(self.config.seed);
                net.fit(&rows, &labels, None)?;
                CalibrationModel::Isotonic(net)
            }
            CalibrationMethod::None => return Ok(()),
        };
        debug!(method = %self.config.calibration_method, n = predictions.len(), "calibrated");
        self.calibration = Some(model);
        Ok(())
    }

    /// Map raw scores through the calibration model, or return them
    /// unchanged when no model is fitted.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::NonFiniteValue`] for a NaN or infinite score.
    pub fn get_calibrated(&self, predictions: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        if let Some(i) = predictions.iter().position(|p| !p.is_finite()) {
            return Err(EnsembleError::NonFiniteValue {
                sample_index: i,
                feature_index: 0,
            });
        }
        match &self.calibration {
            Some(model) => predictions
                .iter()
                .map(|&p| model.predictor().predict_one(&[p]))
                .collect(),
            None => Ok(predictions.to_vec()),
        }
    }

    /// Read ensemble scores as positive-class probabilities in `[0, 1]`.
    ///
    /// A fitted calibration model maps the scores; otherwise the score range
    /// does.
    ///
    /// # Errors
    ///
    /// Same as [`UncertaintyHandler::get_calibrated`].
    pub fn probabilities(&self, predictions: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        let values = self.get_calibrated(predictions)?;
        Ok(match self.calibration {
            Some(_) => values.into_iter().map(|p| p.clamp(0.0, 1.0)).collect(),
            None => values.into_iter().map(|p| self.to_probability(p)).collect(),
        })
    }

    /// Expected calibration error of `get_calibrated(predictions)`.
    ///
    /// # Errors
    ///
    /// Same as [`UncertaintyHandler::get_calibrated`].
    pub fn calibration_error(&self, predictions: &[f64], labels: &[f64]) -> Result<f64, EnsembleError> {
        let calibrated = self.get_calibrated(predictions)?;
        Ok(expected_calibration_error(
            &calibrated,
            labels,
            self.config.ece_bins,
        ))
    }

    /// Switch calibration method; a fitted model is dropped when the method
    /// actually changes.
    pub fn set_calibration_method(&mut self, method: CalibrationMethod) {
        if method != self.config.calibration_method {
            self.calibration = None;
            self.config.calibration_method = method;
        }
    }

    /// Return the active calibration method.
    #[must_use]
    pub fn calibration_method(&self) -> CalibrationMethod {
        self.config.calibration_method
    }

    /// Return `true` when a calibration model is fitted.
    #[must_use]
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &UncertaintyConfig {
        &self.config
    }

    /// Drop the calibration model and reset the score range.
    pub fn dispose(&mut self) {
        self.calibration = None;
        self.score_range = DEFAULT_SCORE_RANGE;
    }
}

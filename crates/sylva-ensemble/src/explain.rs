//! Local explanations of single predictions.
//!
//! Three techniques, selected by [`ExplanationMethod`]:
//!
//! - **LIME**: Gaussian perturbations around the instance, an exponential
//!   distance kernel and a weighted least-squares linear surrogate.
//! - **SHAP (ablation)**: `f(x) − f(x with feature j set to 0)`. This is a
//!   single-pass simplification of Shapley values, which would average the
//!   marginal contribution over every feature coalition.
//! - **Counterfactual**: a fixed number of gradient steps towards the
//!   opposite class with a proximity penalty; no convergence check.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::{ExplainabilityConfig, ExplanationMethod};
use crate::dense::sigmoid;
use crate::error::EnsembleError;
use crate::learner::Predictor;

/// Ridge term added to the LIME normal equations.
const RIDGE: f64 = 1e-8;

/// Weight of the proximity term in the counterfactual loss.
const PROXIMITY_WEIGHT: f64 = 0.1;

/// Explanation of one prediction for one instance. Immutable.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    method: ExplanationMethod,
    feature_names: Vec<String>,
    feature_importance: Vec<f64>,
    local_interpretation: Vec<f64>,
    counterfactual: Option<Vec<f64>>,
    confidence: f64,
    reliability: f64,
}

impl Explanation {
    /// Return the technique that produced this explanation.
    #[must_use]
    pub fn method(&self) -> ExplanationMethod {
        self.method
    }

    /// Return the feature names, parallel to the score vectors.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Non-negative importance per feature.
    #[must_use]
    pub fn feature_importance(&self) -> &[f64] {
        &self.feature_importance
    }

    /// Signed local effect per feature.
    #[must_use]
    pub fn local_interpretation(&self) -> &[f64] {
        &self.local_interpretation
    }

    /// Counterfactual instance, for the counterfactual method only.
    #[must_use]
    pub fn counterfactual(&self) -> Option<&[f64]> {
        self.counterfactual.as_deref()
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Reliability in `[0, 1]`; lower dispersion gives higher reliability.
    #[must_use]
    pub fn reliability(&self) -> f64 {
        self.reliability
    }

    /// Importance of the named feature.
    #[must_use]
    pub fn importance_of(&self, name: &str) -> Option<f64> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.feature_importance[i])
    }

    /// Signed interpretation of the named feature.
    #[must_use]
    pub fn interpretation_of(&self, name: &str) -> Option<f64> {
        self.feature_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.local_interpretation[i])
    }
}

/// Scores produced by one technique before naming.
struct Attribution {
    interpretation: Vec<f64>,
    importance: Vec<f64>,
    counterfactual: Option<Vec<f64>>,
    confidence: f64,
    reliability: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    mean(&values.iter().map(|v| (v - m).powi(2)).collect::<Vec<_>>())
}

/// Produces local explanations for any fitted [`Predictor`].
#[derive(Debug, Clone)]
pub struct ExplainabilityEngine {
    config: ExplainabilityConfig,
}

impl ExplainabilityEngine {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Any error from [`ExplainabilityConfig::validate`].
    pub fn new(config: ExplainabilityConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &ExplainabilityConfig {
        &self.config
    }

    /// Explain `model`'s prediction for `instance`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::NotTrained`] | `model` is not fitted |
    /// | [`EnsembleError::PredictionFeatureMismatch`] | `instance` width differs from the model's |
    /// | [`EnsembleError::FeatureNameCountMismatch`] | one name per feature is not satisfied |
    /// | [`EnsembleError::NonFiniteValue`] | `instance` contains NaN or infinity |
    /// | [`EnsembleError::SingularSystem`] | the LIME normal equations cannot be solved |
    pub fn explain_prediction<P: Predictor + ?Sized>(
        &self,
        model: &P,
        instance: &[f64],
        feature_names: &[String],
    ) -> Result<Explanation, EnsembleError> {
        self.explain_seeded(model, instance, feature_names, self.config.seed)
    }

    /// Explain every row of `instances`, in parallel.
    ///
    /// Row `i` uses seed `seed + i`, so results do not depend on scheduling.
    ///
    /// # Errors
    ///
    /// Same as [`ExplainabilityEngine::explain_prediction`], for the first
    /// failing row.
    #[instrument(skip_all, fields(method = %self.config.method, n_instances = instances.len()))]
    pub fn explain_batch<P: Predictor + ?Sized>(
        &self,
        model: &P,
        instances: &[Vec<f64>],
        feature_names: &[String],
    ) -> Result<Vec<Explanation>, EnsembleError> {
        instances
            .par_iter()
            .enumerate()
            .map(|(i, instance)| {
                self.explain_seeded(
                    model,
                    instance,
                    feature_names,
                    self.config.seed.wrapping_add(i as u64),
                )
            })
            .collect()
    }

    fn explain_seeded<P: Predictor + ?Sized>(
        &self,
        model: &P,
        instance: &[f64],
        feature_names: &[String],
        seed: u64,
    ) -> Result<Explanation, EnsembleError> {
        if !model.is_fitted() {
            return Err(EnsembleError::NotTrained { operation: "explain" });
        }
        if instance.len() != model.n_features() {
            return Err(EnsembleError::PredictionFeatureMismatch {
                expected: model.n_features(),
                got: instance.len(),
            });
        }
        if feature_names.len() != instance.len() {
            return Err(EnsembleError::FeatureNameCountMismatch {
                n_names: feature_names.len(),
                n_features: instance.len(),
            });
        }
        if let Some(feature_index) = instance.iter().position(|v| !v.is_finite()) {
            return Err(EnsembleError::NonFiniteValue {
                sample_index: 0,
                feature_index,
            });
        }

        let attribution = match self.config.method {
            ExplanationMethod::Lime => self.lime(model, instance, seed)?,
            ExplanationMethod::Shap => Self::ablation(model, instance)?,
            ExplanationMethod::Counterfactual => self.counterfactual(model, instance)?,
        };

        debug!(
            method = %self.config.method,
            confidence = attribution.confidence,
            reliability = attribution.reliability,
            "instance explained"
        );

        Ok(Explanation {
            method: self.config.method,
            feature_names: feature_names.to_vec(),
            feature_importance: attribution.importance,
            local_interpretation: attribution.interpretation,
            counterfactual: attribution.counterfactual,
            confidence: attribution.confidence.clamp(0.0, 1.0),
            reliability: attribution.reliability.clamp(0.0, 1.0),
        })
    }

    fn lime<P: Predictor + ?Sized>(
        &self,
        model: &P,
        instance: &[f64],
        seed: u64,
    ) -> Result<Attribution, EnsembleError> {
        let width = self.config.kernel_width;
        let normal = Normal::new(0.0, width).map_err(|e| EnsembleError::InvalidParameter {
            name: "kernel_width",
            reason: e.to_string(),
        })?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let offsets: Vec<Vec<f64>> = (0..self.config.num_samples)
            .map(|_| instance.iter().map(|_| normal.sample(&mut rng)).collect())
            .collect();
        let neighbours: Vec<Vec<f64>> = offsets
            .iter()
            .map(|o| instance.iter().zip(o).map(|(x, d)| x + d).collect())
            .collect();
        let predictions = model.predict_batch(&neighbours)?;
        let kernel: Vec<f64> = offsets
            .iter()
            .map(|o| {
                let distance = o.iter().map(|d| d * d).sum::<f64>().sqrt();
                (-distance / (width * width)).exp()
            })
            .collect();

        // Design matrix over offsets with a leading intercept column.
        let d = instance.len();
        let size = d + 1;
        let mut xtwx = DMatrix::<f64>::zeros(size, size);
        let mut xtwy = DVector::<f64>::zeros(size);
        let mut row = vec![1.0; size];
        for ((offset, &y), &w) in offsets.iter().zip(&predictions).zip(&kernel) {
            row[1..].copy_from_slice(offset);
            for a in 0..size {
                xtwy[a] += w * row[a] * y;
                for b in 0..size {
                    xtwx[(a, b)] += w * row[a] * row[b];
                }
            }
        }
        for a in 0..size {
            xtwx[(a, a)] += RIDGE;
        }
        let beta = xtwx
            .lu()
            .solve(&xtwy)
            .ok_or(EnsembleError::SingularSystem { size })?;

        let interpretation: Vec<f64> = beta.iter().skip(1).copied().collect();
        let weighted: Vec<f64> = predictions.iter().zip(&kernel).map(|(y, w)| y * w).collect();
        Ok(Attribution {
            importance: interpretation.iter().map(|c| c.abs()).collect(),
            interpretation,
            counterfactual: None,
            confidence: 1.0 / (1.0 + variance(&weighted)),
            reliability: (-variance(&predictions).sqrt()).exp(),
        })
    }

    fn ablation<P: Predictor + ?Sized>(model: &P, instance: &[f64]) -> Result<Attribution, EnsembleError> {
        let full = model.predict_one(instance)?;
        let mut perturbed = instance.to_vec();
        let mut phi = Vec::with_capacity(instance.len());
        for j in 0..instance.len() {
            perturbed[j] = 0.0;
            phi.push(full - model.predict_one(&perturbed)?);
            perturbed[j] = instance[j];
        }
        let magnitude = mean(&phi.iter().map(|p| p.abs()).collect::<Vec<_>>());
        Ok(Attribution {
            importance: phi.iter().map(|p| p.abs()).collect(),
            confidence: sigmoid(magnitude),
            reliability: (-variance(&phi)).exp(),
            interpretation: phi,
            counterfactual: None,
        })
    }

    fn counterfactual<P: Predictor + ?Sized>(
        &self,
        model: &P,
        instance: &[f64],
    ) -> Result<Attribution, EnsembleError> {
        let original = model.predict_one(instance)?;
        let target = if original > 0.5 { 0.0 } else { 1.0 };
        let d = instance.len() as f64;
        let step = self.config.counterfactual_step;

        let mut x = instance.to_vec();
        for _ in 0..self.config.counterfactual_iterations {
            let f = model.predict_one(&x)?;
            let gradient = model.input_gradient(&x)?;
            for ((xj, x0), g) in x.iter_mut().zip(instance).zip(&gradient) {
                let loss_gradient =
                    2.0 * (f - target) * g + PROXIMITY_WEIGHT * 2.0 * (*xj - x0) / d;
                *xj -= step * loss_gradient;
            }
        }

        let delta: Vec<f64> = x.iter().zip(instance).map(|(a, b)| a - b).collect();
        let abs_delta: Vec<f64> = delta.iter().map(|v| v.abs()).collect();
        let rms = mean(&delta.iter().map(|v| v * v).collect::<Vec<_>>()).sqrt();
        debug!(original, target, rms, "counterfactual search finished");
        Ok(Attribution {
            confidence: 1.0 / (1.0 + mean(&abs_delta)),
            reliability: (-rms).exp(),
            importance: abs_delta,
            interpretation: delta,
            counterfactual: Some(x),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::LogisticUnit;
    use crate::learner::Learner;

    /// `σ(2·x0 − 3·x1 + 0.5·x2)`.
    struct KnownLogit;

    impl Predictor for KnownLogit {
        fn n_features(&self) -> usize {
            3
        }
        fn is_fitted(&self) -> bool {
            true
        }
        fn predict_one(&self, x: &[f64]) -> Result<f64, EnsembleError> {
            Ok(sigmoid(2.0 * x[0] - 3.0 * x[1] + 0.5 * x[2]))
        }
    }

    struct Unfitted;

    impl Predictor for Unfitted {
        fn n_features(&self) -> usize {
            1
        }
        fn is_fitted(&self) -> bool {
            false
        }
        fn predict_one(&self, _: &[f64]) -> Result<f64, EnsembleError> {
            Ok(0.0)
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    fn engine(method: ExplanationMethod) -> ExplainabilityEngine {
        ExplainabilityEngine::new(ExplainabilityConfig::new().with_method(method)).unwrap()
    }

    // --- LIME ---

    #[test]
    fn lime_recovers_coefficient_signs() {
        let e = engine(ExplanationMethod::Lime)
            .explain_prediction(&KnownLogit, &[0.1, 0.2, -0.3], &names(3))
            .unwrap();
        let c = e.local_interpretation();
        assert!(c[0] > 0.0, "{c:?}");
        assert!(c[1] < 0.0, "{c:?}");
        assert!(c[2] > 0.0, "{c:?}");
        assert!(e.importance_of("f1").unwrap() > e.importance_of("f2").unwrap());
        assert!((0.0..=1.0).contains(&e.confidence()));
        assert!((0.0..=1.0).contains(&e.reliability()));
        assert!(e.counterfactual().is_none());
    }

    #[test]
    fn lime_is_reproducible() {
        let eng = engine(ExplanationMethod::Lime);
        let a = eng.explain_prediction(&KnownLogit, &[0.0; 3], &names(3)).unwrap();
        let b = eng.explain_prediction(&KnownLogit, &[0.0; 3], &names(3)).unwrap();
        assert_eq!(a.local_interpretation(), b.local_interpretation());
    }

    #[test]
    fn lime_on_fitted_learner() {
        let features: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![i as f64 / 60.0, ((i * 13) % 7) as f64 / 7.0])
            .collect();
        let labels: Vec<f64> = features
            .iter()
            .map(|r| if r[0] > 0.5 { 1.0 } else { 0.0 })
            .collect();
        let mut unit = LogisticUnit::new().with_epochs(400).with_learning_rate(2.0);
        unit.fit(&features, &labels, None).unwrap();
        let e = engine(ExplanationMethod::Lime)
            .explain_prediction(&unit, &[0.5, 0.5], &names(2))
            .unwrap();
        assert!(e.local_interpretation()[0] > 0.0);
    }

    // --- SHAP ---

    #[test]
    fn ablation_matches_hand_computation() {
        let x = [1.0, 1.0, 2.0];
        let e = engine(ExplanationMethod::Shap)
            .explain_prediction(&KnownLogit, &x, &names(3))
            .unwrap();
        let full = sigmoid(2.0 - 3.0 + 1.0);
        let without_f1 = sigmoid(2.0 + 1.0);
        assert!((e.local_interpretation()[1] - (full - without_f1)).abs() < 1e-12);
        assert!(e.local_interpretation()[1] < 0.0);
        assert!(e.feature_importance().iter().all(|&v| v >= 0.0));
        assert!(e.confidence() >= 0.5);
    }

    // --- Counterfactual ---

    #[test]
    fn counterfactual_moves_towards_opposite_class() {
        let x = [1.0, 0.0, 0.0];
        let eng = ExplainabilityEngine::new(
            ExplainabilityConfig::new()
                .with_method(ExplanationMethod::Counterfactual)
                .with_counterfactual_step(0.5)
                .with_counterfactual_iterations(200),
        )
        .unwrap();
        let e = eng.explain_prediction(&KnownLogit, &x, &names(3)).unwrap();
        let cf = e.counterfactual().unwrap();
        let before = KnownLogit.predict_one(&x).unwrap();
        let after = KnownLogit.predict_one(cf).unwrap();
        assert!(before > 0.5);
        assert!(after < before, "before {before}, after {after}");
        assert!(e.local_interpretation()[0] < 0.0);
        assert!(e.local_interpretation()[1] > 0.0);
        assert!((0.0..=1.0).contains(&e.confidence()));
    }

    // --- Errors ---

    #[test]
    fn unfitted_model_is_state_error() {
        let err = engine(ExplanationMethod::Lime)
            .explain_prediction(&Unfitted, &[0.0], &names(1))
            .unwrap_err();
        assert!(matches!(err, EnsembleError::NotTrained { .. }));
    }

    #[test]
    fn width_mismatch_is_data_error() {
        let err = engine(ExplanationMethod::Shap)
            .explain_prediction(&KnownLogit, &[0.0], &names(1))
            .unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::PredictionFeatureMismatch { expected: 3, got: 1 }
        ));
    }

    #[test]
    fn batch_is_order_stable() {
        let eng = engine(ExplanationMethod::Lime);
        let rows = vec![vec![0.0, 0.0, 0.0], vec![0.5, -0.5, 0.1]];
        let batch = eng.explain_batch(&KnownLogit, &rows, &names(3)).unwrap();
        let again = eng.explain_batch(&KnownLogit, &rows, &names(3)).unwrap();
        assert_eq!(batch.len(), 2);
        for (a, b) in batch.iter().zip(&again) {
            assert_eq!(a.local_interpretation(), b.local_interpretation());
        }
    }
}

//! The consumer-facing ensemble: lifecycle, training workflow and queries.

use std::fmt;
use std::time::Instant;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::confusion::{ClassMetrics, ConfusionMatrix, nearest_class};
use crate::config::SylvaConfig;
use crate::dataset::{Dataset, class_indices, project_rows, validate_batch};
use crate::ensemble::{EnsembleManager, TrainingReport, accuracy_within_half, mean_squared_error};
use crate::error::EnsembleError;
use crate::explain::{ExplainabilityEngine, Explanation};
use crate::feature_analysis::{FeatureAnalyzer, FeatureScores, RankedFeature};
use crate::learner::Predictor;
use crate::tree::TreeLearner;
use crate::uncertainty::{UncertaintyHandler, UncertaintyMetrics};

/// Rows sampled when scoring explainability.
const EXPLAINABILITY_ROWS: usize = 20;

/// Lifecycle of a [`DecisionTreeEnsemble`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed; `initialize` not yet called.
    Uninitialized,
    /// Ready to train.
    Initialized,
    /// Trained; predictions and explanations are available.
    Trained,
    /// Released; every operation fails.
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Trained => "trained",
            LifecycleState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// One row of [`DecisionTreeEnsemble::predict`] output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// Aggregated ensemble score.
    pub value: f64,
    /// Probability of the largest training label, in `[0, 1]`.
    pub probability: f64,
    /// Training label value closest to `value`.
    pub class: f64,
    /// Entropy of the mean member prediction.
    pub entropy: f64,
    /// Variance across members.
    pub variance: f64,
    /// `1 − entropy / ln 2`, clamped to `[0, 1]`.
    pub confidence: f64,
}

/// Result of [`DecisionTreeEnsemble::train`].
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    /// Number of training rows.
    pub n_samples: usize,
    /// Number of input feature columns.
    pub n_features: usize,
    /// Features the ensemble was trained on, in selection order.
    pub selected_features: Vec<String>,
    /// Importances of all input features, ranked.
    pub importances: Vec<RankedFeature>,
    /// Ensemble training details.
    pub ensemble: TrainingReport,
    /// Accuracy of the aggregated prediction on the training rows.
    pub training_accuracy: f64,
    /// Mean per-sample variance of member predictions on the training rows.
    pub diversity: f64,
    /// Whether a calibration model was fitted.
    pub calibrated: bool,
    /// Expected calibration error on the training rows, when calibrated.
    pub calibration_error: Option<f64>,
    /// Mean explanation confidence over sampled training rows.
    pub explainability_score: f64,
    /// Wall-clock training time in milliseconds.
    pub duration_ms: f64,
}

/// Result of [`DecisionTreeEnsemble::evaluate`].
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    /// Number of evaluated rows.
    pub n_samples: usize,
    /// Fraction of rows whose predicted class equals the label.
    pub accuracy: f64,
    /// Mean squared error of the raw ensemble score.
    pub mse: f64,
    /// Confusion matrix over the training classes.
    pub confusion_matrix: ConfusionMatrix,
    /// Per-class precision, recall and F1.
    pub class_metrics: Vec<ClassMetrics>,
    /// Total size of all members (tree nodes).
    pub model_size: usize,
    /// Mean prediction latency per row, in microseconds.
    pub mean_inference_us: f64,
    /// Batch uncertainty on the evaluated rows.
    pub uncertainty: UncertaintyMetrics,
    /// Mean explanation confidence over sampled evaluated rows.
    pub explainability_score: f64,
}

/// Presents the trained ensemble over the full input feature space.
///
/// Rows are projected onto the selected columns before prediction, so
/// unselected features have no effect.
struct ProjectedEnsemble<'a> {
    ensemble: &'a EnsembleManager,
    columns: &'a [usize],
    n_input: usize,
}

impl Predictor for ProjectedEnsemble<'_> {
    fn n_features(&self) -> usize {
        self.n_input
    }

    fn is_fitted(&self) -> bool {
        self.ensemble.is_trained()
    }

    fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
        let mut out = self.predict_batch(&[sample.to_vec()])?;
        out.pop().ok_or(EnsembleError::EmptyDataset)
    }

    fn predict_batch(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, EnsembleError> {
        validate_batch(features, self.n_input)?;
        self.ensemble.predict(&project_rows(features, self.columns))
    }
}

/// Tree ensemble with feature selection, uncertainty and explanations.
///
/// Lifecycle: [`new`](Self::new) → [`initialize`](Self::initialize) →
/// [`train`](Self::train) → queries → [`dispose`](Self::dispose).
#[derive(Debug)]
pub struct DecisionTreeEnsemble {
    config: SylvaConfig,
    state: LifecycleState,
    analyzer: FeatureAnalyzer,
    ensemble: EnsembleManager,
    uncertainty: UncertaintyHandler,
    explainer: ExplainabilityEngine,
    input_names: Vec<String>,
    selected: Vec<usize>,
    classes: Vec<f64>,
    importances: Option<FeatureScores>,
    explainability: f64,
}

impl DecisionTreeEnsemble {
    /// Build every component from `config`. Starts `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Any configuration error from [`SylvaConfig::validate`].
    pub fn new(config: SylvaConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        Ok(Self {
            analyzer: FeatureAnalyzer::new(config.features.clone())?,
            ensemble: EnsembleManager::new(config.ensemble.clone())?,
            uncertainty: UncertaintyHandler::new(config.uncertainty.clone())?,
            explainer: ExplainabilityEngine::new(config.explain.clone())?,
            config,
            state: LifecycleState::Uninitialized,
            input_names: Vec::new(),
            selected: Vec::new(),
            classes: Vec::new(),
            importances: None,
            explainability: 0.0,
        })
    }

    /// Return the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &SylvaConfig {
        &self.config
    }

    /// Move from `Uninitialized` to `Initialized`. A no-op when already
    /// initialized.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::AlreadyTrained`] once trained,
    /// [`EnsembleError::Disposed`] after dispose.
    pub fn initialize(&mut self) -> Result<(), EnsembleError> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Initialized => {
                self.state = LifecycleState::Initialized;
                Ok(())
            }
            LifecycleState::Trained => Err(EnsembleError::AlreadyTrained),
            LifecycleState::Disposed => Err(EnsembleError::Disposed {
                operation: "initialize",
            }),
        }
    }

    fn require_trained(&self, operation: &'static str) -> Result<(), EnsembleError> {
        match self.state {
            LifecycleState::Trained => Ok(()),
            LifecycleState::Uninitialized => Err(EnsembleError::NotInitialized { operation }),
            LifecycleState::Initialized => Err(EnsembleError::NotTrained { operation }),
            LifecycleState::Disposed => Err(EnsembleError::Disposed { operation }),
        }
    }

    /// Train on `dataset`. Equivalent to `train_with_validation(dataset, None)`.
    ///
    /// # Errors
    ///
    /// See [`DecisionTreeEnsemble::train_with_validation`].
    pub fn train(&mut self, dataset: &Dataset) -> Result<TrainingSummary, EnsembleError> {
        self.train_with_validation(dataset, None)
    }

    /// Analyze and select features, train the ensemble on the selected
    /// columns, then calibrate when enabled.
    ///
    /// Calibration needs at most two classes; the larger label value is the
    /// positive class.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::NotInitialized`] | `initialize` not called |
    /// | [`EnsembleError::AlreadyTrained`] | Already trained |
    /// | [`EnsembleError::Disposed`] | After dispose |
    /// | [`EnsembleError::PredictionFeatureMismatch`] | Validation width differs from training width |
    /// | Other errors | Propagated from the components |
    #[instrument(skip_all, fields(n_samples = dataset.n_samples(), n_features = dataset.n_features()))]
    pub fn train_with_validation(
        &mut self,
        dataset: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<TrainingSummary, EnsembleError> {
        match self.state {
            LifecycleState::Initialized => {}
            LifecycleState::Uninitialized => {
                return Err(EnsembleError::NotInitialized { operation: "train" });
            }
            LifecycleState::Trained => return Err(EnsembleError::AlreadyTrained),
            LifecycleState::Disposed => return Err(EnsembleError::Disposed { operation: "train" }),
        }
        if let Some(val) = validation
            && val.n_features() != dataset.n_features()
        {
            return Err(EnsembleError::PredictionFeatureMismatch {
                expected: dataset.n_features(),
                got: val.n_features(),
            });
        }
        let started = Instant::now();
        let names = dataset.feature_names();

        let scores = self
            .analyzer
            .analyze_features(dataset.features(), dataset.labels(), names)?;
        let mut selected_names = self.analyzer.select_features(dataset.features(), names)?;
        if selected_names.is_empty() {
            warn!("no feature passed selection; training on all features");
            selected_names = names.to_vec();
        }
        let selected: Vec<usize> = selected_names
            .iter()
            .filter_map(|s| names.iter().position(|n| n == s))
            .collect();

        let projected = dataset.project(&selected);
        let projected_validation = validation.map(|v| v.project(&selected));

        self.ensemble
            .create_ensemble(&TreeLearner::new(self.config.tree.clone()));
        let report = self.ensemble.train_ensemble(
            projected.features(),
            projected.labels(),
            projected_validation
                .as_ref()
                .map(|v| (v.features(), v.labels())),
        )?;

        let predictions = self.ensemble.predict(projected.features())?;
        let training_accuracy = accuracy_within_half(&predictions, dataset.labels());
        let diversity = self.ensemble.diversity(projected.features())?;

        let (_, n_classes) = class_indices(dataset.labels());
        let mut classes = dataset.labels().to_vec();
        classes.sort_unstable_by(f64::total_cmp);
        classes.dedup();

        self.uncertainty.dispose();
        if let (Some(&low), Some(&high)) = (classes.first(), classes.last())
            && high > low
        {
            self.uncertainty.set_score_range(low, high)?;
        }
        let mut calibration_error = None;
        if self.config.enable_calibration {
            if n_classes <= 2 {
                let positive = classes[classes.len() - 1];
                let targets: Vec<f64> = dataset
                    .labels()
                    .iter()
                    .map(|&l| if n_classes == 2 && l == positive { 1.0 } else { 0.0 })
                    .collect();
                self.uncertainty.calibrate(&predictions, &targets)?;
                if self.uncertainty.is_calibrated() {
                    calibration_error =
                        Some(self.uncertainty.calibration_error(&predictions, &targets)?);
                }
            } else {
                warn!(n_classes, "calibration skipped for more than two classes");
            }
        }

        self.input_names = names.to_vec();
        self.selected = selected;
        self.classes = classes;
        self.importances = Some(scores.clone());
        self.explainability = self.sampled_explainability(dataset.features())?;
        self.state = LifecycleState::Trained;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            selected = selected_names.len(),
            training_accuracy,
            diversity,
            explainability = self.explainability,
            duration_ms,
            "ensemble trained"
        );

        Ok(TrainingSummary {
            n_samples: dataset.n_samples(),
            n_features: dataset.n_features(),
            selected_features: selected_names,
            importances: scores.ranked(),
            ensemble: report,
            training_accuracy,
            diversity,
            calibrated: self.uncertainty.is_calibrated(),
            calibration_error,
            explainability_score: self.explainability,
            duration_ms,
        })
    }

    fn projected_model(&self) -> ProjectedEnsemble<'_> {
        ProjectedEnsemble {
            ensemble: &self.ensemble,
            columns: &self.selected,
            n_input: self.input_names.len(),
        }
    }

    /// Mean explanation confidence over up to [`EXPLAINABILITY_ROWS`] rows
    /// drawn with the explanation seed.
    fn sampled_explainability(&self, features: &[Vec<f64>]) -> Result<f64, EnsembleError> {
        let mut order: Vec<usize> = (0..features.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.explain.seed());
        order.shuffle(&mut rng);
        order.truncate(EXPLAINABILITY_ROWS);
        if order.is_empty() {
            return Ok(0.0);
        }
        let rows: Vec<Vec<f64>> = order.iter().map(|&i| features[i].clone()).collect();
        let model = self.projected_model();
        let explanations = self.explainer.explain_batch(&model, &rows, &self.input_names)?;
        let score =
            explanations.iter().map(Explanation::confidence).sum::<f64>() / rows.len() as f64;
        debug!(n_rows = rows.len(), score, "explainability scored");
        Ok(score)
    }

    fn project(&self, features: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, EnsembleError> {
        validate_batch(features, self.input_names.len())?;
        Ok(project_rows(features, &self.selected))
    }

    /// Predict every row with per-sample uncertainty.
    ///
    /// # Errors
    ///
    /// State errors unless trained; [`EnsembleError::PredictionFeatureMismatch`]
    /// or [`EnsembleError::NonFiniteValue`] for a malformed batch.
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<Prediction>, EnsembleError> {
        self.require_trained("predict")?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let projected = self.project(features)?;
        let values = self.ensemble.predict(&projected)?;
        let member_predictions = self.ensemble.member_predictions(&projected)?;
        let per_sample = self.uncertainty.per_sample(&member_predictions)?;
        let probabilities = self.uncertainty.probabilities(&values)?;

        Ok(values
            .iter()
            .zip(&probabilities)
            .zip(&per_sample)
            .map(|((&value, &probability), u)| Prediction {
                value,
                probability,
                class: self.classes[nearest_class(&self.classes, value)],
                entropy: u.entropy,
                variance: u.variance,
                confidence: u.confidence,
            })
            .collect())
    }

    /// Explain every row over the full input feature space.
    ///
    /// # Errors
    ///
    /// State errors unless trained; data errors for a malformed batch;
    /// explanation errors from [`ExplainabilityEngine`].
    pub fn explain(&self, features: &[Vec<f64>]) -> Result<Vec<Explanation>, EnsembleError> {
        self.require_trained("explain")?;
        validate_batch(features, self.input_names.len())?;
        self.explainer
            .explain_batch(&self.projected_model(), features, &self.input_names)
    }

    /// Mean explanation confidence over sampled training rows, in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// State errors unless trained.
    pub fn explainability_score(&self) -> Result<f64, EnsembleError> {
        self.require_trained("explainability_score")?;
        Ok(self.explainability)
    }

    /// Importances of all input features from the last training run.
    ///
    /// # Errors
    ///
    /// State errors unless trained.
    pub fn feature_importance(&self) -> Result<&FeatureScores, EnsembleError> {
        self.require_trained("feature_importance")?;
        self.importances
            .as_ref()
            .ok_or(EnsembleError::ImportancesNotComputed)
    }

    /// Names of the features the ensemble was trained on.
    ///
    /// # Errors
    ///
    /// State errors unless trained.
    pub fn selected_features(&self) -> Result<Vec<String>, EnsembleError> {
        self.require_trained("selected_features")?;
        Ok(self
            .selected
            .iter()
            .map(|&i| self.input_names[i].clone())
            .collect())
    }

    /// Batch uncertainty of the members on `features`. Never cached.
    ///
    /// # Errors
    ///
    /// State errors unless trained; data errors for a malformed batch.
    pub fn uncertainty_metrics(
        &self,
        features: &[Vec<f64>],
    ) -> Result<UncertaintyMetrics, EnsembleError> {
        self.require_trained("uncertainty_metrics")?;
        let projected = self.project(features)?;
        let member_predictions = self.ensemble.member_predictions(&projected)?;
        self.uncertainty.metrics(&member_predictions)
    }

    /// Score the trained ensemble on a labelled dataset.
    ///
    /// # Errors
    ///
    /// State errors unless trained; [`EnsembleError::PredictionFeatureMismatch`]
    /// when the dataset width differs from the training width.
    #[instrument(skip_all, fields(n_samples = dataset.n_samples()))]
    pub fn evaluate(&self, dataset: &Dataset) -> Result<EvaluationReport, EnsembleError> {
        self.require_trained("evaluate")?;
        let started = Instant::now();
        let predictions = self.predict(dataset.features())?;
        let elapsed = started.elapsed();

        let values: Vec<f64> = predictions.iter().map(|p| p.value).collect();
        let confusion_matrix =
            ConfusionMatrix::from_predictions(dataset.labels(), &values, &self.classes)?;
        let accuracy = confusion_matrix.accuracy();
        let uncertainty = self.uncertainty_metrics(dataset.features())?;
        let explainability_score = self.sampled_explainability(dataset.features())?;

        info!(accuracy, explainability_score, "evaluation complete");
        Ok(EvaluationReport {
            n_samples: dataset.n_samples(),
            accuracy,
            mse: mean_squared_error(&values, dataset.labels()),
            class_metrics: confusion_matrix.class_metrics(),
            confusion_matrix,
            model_size: self.ensemble.model_size(),
            mean_inference_us: elapsed.as_secs_f64() * 1e6 / dataset.n_samples() as f64,
            uncertainty,
            explainability_score,
        })
    }

    /// Release members, calibration and importances. Valid from any state;
    /// calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }
        self.ensemble.dispose();
        self.uncertainty.dispose();
        self.analyzer.dispose();
        self.importances = None;
        self.selected.clear();
        self.classes.clear();
        self.explainability = 0.0;
        self.state = LifecycleState::Disposed;
        info!("ensemble disposed");
    }
}

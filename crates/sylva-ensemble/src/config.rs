//! Configuration builders and method enums for every component.
//!
//! Each config is constructed with `new`, refined with `with_*` setters and
//! checked with `validate`. All configs deserialize from JSON with missing
//! fields filled by their defaults; `validate` is the single source of truth
//! for parameter ranges, so deserialized configs must be validated before use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EnsembleError;
use crate::tree::DecisionTreeConfig;

macro_rules! method_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, $expected:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Canonical lowercase name.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EnsembleError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(EnsembleError::UnknownMethod {
                        kind: $kind,
                        value: s.to_string(),
                        expected: $expected,
                    }),
                }
            }
        }
    };
}

method_enum! {
    /// How ensemble members are trained.
    EnsembleMethod, "ensemble", "bagging, boosting, stacking" {
        /// Independent members on bootstrap resamples.
        Bagging => "bagging",
        /// Sequential members on reweighted samples.
        Boosting => "boosting",
        /// Base members plus a meta member trained on their outputs.
        Stacking => "stacking",
    }
}

method_enum! {
    /// Per-feature importance signal used by the feature analyzer.
    ImportanceMethod, "importance", "gini, permutation, shap" {
        /// Best single-split Gini impurity.
        Gini => "gini",
        /// Stump accuracy drop after shuffling one column.
        Permutation => "permutation",
        /// Mean ablation contribution against the expected label.
        Shap => "shap",
    }
}

method_enum! {
    /// Local explanation technique.
    ExplanationMethod, "explanation", "lime, shap, counterfactual" {
        /// Weighted linear surrogate fit on Gaussian perturbations.
        Lime => "lime",
        /// Single-feature zero ablation.
        Shap => "shap",
        /// Gradient search for the nearest class flip.
        Counterfactual => "counterfactual",
    }
}

method_enum! {
    /// Score-to-probability calibration model.
    CalibrationMethod, "calibration", "platt, isotonic, none" {
        /// Single sigmoid unit.
        Platt => "platt",
        /// Small two-layer regressor.
        Isotonic => "isotonic",
        /// Identity; no model is fitted.
        None => "none",
    }
}

method_enum! {
    /// Scalar summary returned by `calculate_uncertainty`.
    UncertaintyMethod, "uncertainty", "entropy, variance, mutual_information" {
        /// Entropy of the mean prediction.
        Entropy => "entropy",
        /// Variance across members.
        Variance => "variance",
        /// Entropy of the mean minus mean member entropy.
        MutualInformation => "mutual_information",
    }
}

method_enum! {
    /// How member predictions are combined outside stacking.
    VotingStrategy, "voting", "weighted, mean, mode" {
        /// Member-weight weighted sum.
        Weighted => "weighted",
        /// Elementwise mean.
        Mean => "mean",
        /// Most frequent rounded class; ties go to the smaller class.
        Mode => "mode",
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), EnsembleError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EnsembleError::InvalidThreshold {
            name,
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), EnsembleError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EnsembleError::InvalidParameter {
            name,
            reason: format!("must be finite and > 0, got {value}"),
        });
    }
    Ok(())
}

fn check_nonzero(name: &'static str, value: usize) -> Result<(), EnsembleError> {
    if value == 0 {
        return Err(EnsembleError::InvalidParameter {
            name,
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

/// Configuration for feature importance and selection.
///
/// # Defaults
///
/// | Parameter                | Default       |
/// |--------------------------|---------------|
/// | `importance_method`      | `Gini`        |
/// | `use_feature_selection`  | `true`        |
/// | `min_feature_importance` | 0.01          |
/// | `correlation_threshold`  | 0.95          |
/// | `permutation_repeats`    | 5             |
/// | `seed`                   | 42            |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureAnalyzerConfig {
    pub(crate) importance_method: ImportanceMethod,
    pub(crate) use_feature_selection: bool,
    pub(crate) min_feature_importance: f64,
    pub(crate) correlation_threshold: f64,
    pub(crate) permutation_repeats: usize,
    pub(crate) seed: u64,
}

impl FeatureAnalyzerConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            importance_method: ImportanceMethod::Gini,
            use_feature_selection: true,
            min_feature_importance: 0.01,
            correlation_threshold: 0.95,
            permutation_repeats: 5,
            seed: 42,
        }
    }

    /// Set the importance method.
    #[must_use]
    pub fn with_importance_method(mut self, method: ImportanceMethod) -> Self {
        self.importance_method = method;
        self
    }

    /// Enable or disable correlation-based selection.
    #[must_use]
    pub fn with_feature_selection(mut self, enabled: bool) -> Self {
        self.use_feature_selection = enabled;
        self
    }

    /// Set the minimum importance a feature needs to be selected.
    #[must_use]
    pub fn with_min_feature_importance(mut self, value: f64) -> Self {
        self.min_feature_importance = value;
        self
    }

    /// Set the absolute correlation above which a candidate is dropped.
    #[must_use]
    pub fn with_correlation_threshold(mut self, value: f64) -> Self {
        self.correlation_threshold = value;
        self
    }

    /// Set the number of shuffles averaged by permutation importance.
    #[must_use]
    pub fn with_permutation_repeats(mut self, repeats: usize) -> Self {
        self.permutation_repeats = repeats;
        self
    }

    /// Set the shuffle seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the importance method.
    #[must_use]
    pub fn importance_method(&self) -> ImportanceMethod {
        self.importance_method
    }

    /// Return whether selection is enabled.
    #[must_use]
    pub fn use_feature_selection(&self) -> bool {
        self.use_feature_selection
    }

    /// Return the minimum importance threshold.
    #[must_use]
    pub fn min_feature_importance(&self) -> f64 {
        self.min_feature_importance
    }

    /// Return the correlation threshold.
    #[must_use]
    pub fn correlation_threshold(&self) -> f64 {
        self.correlation_threshold
    }

    /// Return the permutation repeat count.
    #[must_use]
    pub fn permutation_repeats(&self) -> usize {
        self.permutation_repeats
    }

    /// Return the seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::InvalidThreshold`] | `min_feature_importance` or `correlation_threshold` outside [0, 1] |
    /// | [`EnsembleError::InvalidParameter`] | `permutation_repeats` is 0 |
    pub fn validate(&self) -> Result<(), EnsembleError> {
        check_unit_interval("min_feature_importance", self.min_feature_importance)?;
        check_unit_interval("correlation_threshold", self.correlation_threshold)?;
        check_nonzero("permutation_repeats", self.permutation_repeats)
    }
}

impl Default for FeatureAnalyzerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for ensemble construction and aggregation.
///
/// # Defaults
///
/// | Parameter         | Default     |
/// |-------------------|-------------|
/// | `method`          | `Bagging`   |
/// | `voting`          | `Weighted`  |
/// | `subsample_ratio` | 0.8         |
/// | `seed`            | 42          |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub(crate) ensemble_size: usize,
    pub(crate) method: EnsembleMethod,
    pub(crate) voting: VotingStrategy,
    pub(crate) subsample_ratio: f64,
    pub(crate) seed: u64,
}

impl EnsembleConfig {
    /// Create a config with the given number of members.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::InvalidEnsembleSize`] if `ensemble_size` is zero.
    pub fn new(ensemble_size: usize) -> Result<Self, EnsembleError> {
        if ensemble_size == 0 {
            return Err(EnsembleError::InvalidEnsembleSize { ensemble_size });
        }
        Ok(Self {
            ensemble_size,
            method: EnsembleMethod::Bagging,
            voting: VotingStrategy::Weighted,
            subsample_ratio: 0.8,
            seed: 42,
        })
    }

    /// Set the training method.
    #[must_use]
    pub fn with_method(mut self, method: EnsembleMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the voting strategy used outside stacking.
    #[must_use]
    pub fn with_voting(mut self, voting: VotingStrategy) -> Self {
        self.voting = voting;
        self
    }

    /// Set the bootstrap sample size as a fraction of the training rows.
    #[must_use]
    pub fn with_subsample_ratio(mut self, ratio: f64) -> Self {
        self.subsample_ratio = ratio;
        self
    }

    /// Set the master seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the number of members.
    #[must_use]
    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    /// Return the training method.
    #[must_use]
    pub fn method(&self) -> EnsembleMethod {
        self.method
    }

    /// Return the voting strategy.
    #[must_use]
    pub fn voting(&self) -> VotingStrategy {
        self.voting
    }

    /// Return the subsample ratio.
    #[must_use]
    pub fn subsample_ratio(&self) -> f64 {
        self.subsample_ratio
    }

    /// Return the master seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::InvalidEnsembleSize`] | `ensemble_size` is 0 |
    /// | [`EnsembleError::StackingTooFewMembers`] | stacking with fewer than 2 members |
    /// | [`EnsembleError::InvalidSubsampleRatio`] | ratio outside (0, 1] |
    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.ensemble_size == 0 {
            return Err(EnsembleError::InvalidEnsembleSize {
                ensemble_size: self.ensemble_size,
            });
        }
        if self.method == EnsembleMethod::Stacking && self.ensemble_size < 2 {
            return Err(EnsembleError::StackingTooFewMembers {
                ensemble_size: self.ensemble_size,
            });
        }
        if !(self.subsample_ratio > 0.0 && self.subsample_ratio <= 1.0) {
            return Err(EnsembleError::InvalidSubsampleRatio {
                ratio: self.subsample_ratio,
            });
        }
        Ok(())
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 5,
            method: EnsembleMethod::Bagging,
            voting: VotingStrategy::Weighted,
            subsample_ratio: 0.8,
            seed: 42,
        }
    }
}

/// Configuration for uncertainty scoring and calibration.
///
/// # Defaults
///
/// | Parameter            | Default    |
/// |----------------------|------------|
/// | `method`             | `Entropy`  |
/// | `calibration_method` | `Platt`    |
/// | `epochs`             | 200        |
/// | `learning_rate`      | 0.5        |
/// | `hidden_units`       | 8          |
/// | `ece_bins`           | 10         |
/// | `seed`               | 42         |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub(crate) method: UncertaintyMethod,
    pub(crate) calibration_method: CalibrationMethod,
    pub(crate) epochs: usize,
    pub(crate) learning_rate: f64,
    pub(crate) hidden_units: usize,
    pub(crate) ece_bins: usize,
    pub(crate) seed: u64,
}

impl UncertaintyConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            method: UncertaintyMethod::Entropy,
            calibration_method: CalibrationMethod::Platt,
            epochs: 200,
            learning_rate: 0.5,
            hidden_units: 8,
            ece_bins: 10,
            seed: 42,
        }
    }

    /// Set the scalar uncertainty method.
    #[must_use]
    pub fn with_method(mut self, method: UncertaintyMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the calibration method.
    #[must_use]
    pub fn with_calibration_method(mut self, method: CalibrationMethod) -> Self {
        self.calibration_method = method;
        self
    }

    /// Set the number of gradient-descent epochs for calibration models.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the calibration learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the hidden width of the isotonic-style regressor.
    #[must_use]
    pub fn with_hidden_units(mut self, hidden_units: usize) -> Self {
        self.hidden_units = hidden_units;
        self
    }

    /// Set the number of bins for expected calibration error.
    #[must_use]
    pub fn with_ece_bins(mut self, bins: usize) -> Self {
        self.ece_bins = bins;
        self
    }

    /// Set the initialisation seed of calibration models.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the scalar uncertainty method.
    #[must_use]
    pub fn method(&self) -> UncertaintyMethod {
        self.method
    }

    /// Return the calibration method.
    #[must_use]
    pub fn calibration_method(&self) -> CalibrationMethod {
        self.calibration_method
    }

    /// Return the calibration epoch count.
    #[must_use]
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Return the calibration learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Return the hidden width of the isotonic-style regressor.
    #[must_use]
    pub fn hidden_units(&self) -> usize {
        self.hidden_units
    }

    /// Return the ECE bin count.
    #[must_use]
    pub fn ece_bins(&self) -> usize {
        self.ece_bins
    }

    /// Return the seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::InvalidParameter`] for a zero epoch, hidden-unit or
    /// bin count, or a non-positive learning rate.
    pub fn validate(&self) -> Result<(), EnsembleError> {
        check_nonzero("epochs", self.epochs)?;
        check_positive("learning_rate", self.learning_rate)?;
        check_nonzero("hidden_units", self.hidden_units)?;
        check_nonzero("ece_bins", self.ece_bins)
    }
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for local explanations.
///
/// # Defaults
///
/// | Parameter                   | Default  |
/// |-----------------------------|----------|
/// | `method`                    | `Lime`   |
/// | `num_samples`               | 500      |
/// | `kernel_width`              | 0.75     |
/// | `counterfactual_iterations` | 100      |
/// | `counterfactual_step`       | 0.1      |
/// | `seed`                      | 42       |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainabilityConfig {
    pub(crate) method: ExplanationMethod,
    pub(crate) num_samples: usize,
    pub(crate) kernel_width: f64,
    pub(crate) counterfactual_iterations: usize,
    pub(crate) counterfactual_step: f64,
    pub(crate) seed: u64,
}

impl ExplainabilityConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            method: ExplanationMethod::Lime,
            num_samples: 500,
            kernel_width: 0.75,
            counterfactual_iterations: 100,
            counterfactual_step: 0.1,
            seed: 42,
        }
    }

    /// Set the explanation method.
    #[must_use]
    pub fn with_method(mut self, method: ExplanationMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the number of LIME perturbations.
    #[must_use]
    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    /// Set the perturbation std and kernel width.
    #[must_use]
    pub fn with_kernel_width(mut self, kernel_width: f64) -> Self {
        self.kernel_width = kernel_width;
        self
    }

    /// Set the number of counterfactual gradient steps.
    #[must_use]
    pub fn with_counterfactual_iterations(mut self, iterations: usize) -> Self {
        self.counterfactual_iterations = iterations;
        self
    }

    /// Set the counterfactual step size.
    #[must_use]
    pub fn with_counterfactual_step(mut self, step: f64) -> Self {
        self.counterfactual_step = step;
        self
    }

    /// Set the perturbation seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the explanation method.
    #[must_use]
    pub fn method(&self) -> ExplanationMethod {
        self.method
    }

    /// Return the number of LIME perturbations.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Return the kernel width.
    #[must_use]
    pub fn kernel_width(&self) -> f64 {
        self.kernel_width
    }

    /// Return the counterfactual iteration count.
    #[must_use]
    pub fn counterfactual_iterations(&self) -> usize {
        self.counterfactual_iterations
    }

    /// Return the counterfactual step size.
    #[must_use]
    pub fn counterfactual_step(&self) -> f64 {
        self.counterfactual_step
    }

    /// Return the seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::InvalidParameter`] for a zero sample or iteration
    /// count, or a non-positive kernel width or step.
    pub fn validate(&self) -> Result<(), EnsembleError> {
        check_nonzero("num_samples", self.num_samples)?;
        check_positive("kernel_width", self.kernel_width)?;
        check_nonzero("counterfactual_iterations", self.counterfactual_iterations)?;
        check_positive("counterfactual_step", self.counterfactual_step)
    }
}

impl Default for ExplainabilityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Full configuration of a [`DecisionTreeEnsemble`](crate::DecisionTreeEnsemble).
///
/// Readable from JSON; every section and field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SylvaConfig {
    /// Feature importance and selection.
    pub features: FeatureAnalyzerConfig,
    /// Ensemble construction.
    pub ensemble: EnsembleConfig,
    /// Template for every tree member.
    pub tree: DecisionTreeConfig,
    /// Uncertainty and calibration.
    pub uncertainty: UncertaintyConfig,
    /// Local explanations.
    pub explain: ExplainabilityConfig,
    /// Whether to fit a calibration model after training.
    pub enable_calibration: bool,
}

impl SylvaConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// The first configuration error found, section by section.
    pub fn validate(&self) -> Result<(), EnsembleError> {
        self.features.validate()?;
        self.ensemble.validate()?;
        self.tree.validate()?;
        self.uncertainty.validate()?;
        self.explain.validate()
    }
}

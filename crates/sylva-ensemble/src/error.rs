/// Broad category of an [`EnsembleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration: sizes, thresholds, method names.
    Configuration,
    /// Operation called in the wrong lifecycle state.
    State,
    /// Malformed input data.
    Data,
}

/// Errors from ensemble construction, training, prediction, and explanation.
#[derive(Debug, thiserror::Error)]
pub enum EnsembleError {
    /// Returned when the ensemble size is zero.
    #[error("ensemble_size must be at least 1, got {ensemble_size}")]
    InvalidEnsembleSize {
        /// The invalid ensemble size provided.
        ensemble_size: usize,
    },

    /// Returned when stacking is requested with fewer than two members.
    #[error("stacking needs at least 2 members (base + meta), got {ensemble_size}")]
    StackingTooFewMembers {
        /// The configured ensemble size.
        ensemble_size: usize,
    },

    /// Returned when subsample_ratio is not in (0.0, 1.0].
    #[error("subsample_ratio must be in (0.0, 1.0], got {ratio}")]
    InvalidSubsampleRatio {
        /// The invalid ratio provided.
        ratio: f64,
    },

    /// Returned when a threshold parameter is outside its valid range.
    #[error("{name} must be in [{min}, {max}], got {value}")]
    InvalidThreshold {
        /// Name of the threshold parameter.
        name: &'static str,
        /// The invalid value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// Returned when a numeric or count parameter is invalid.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Name of the parameter.
        name: &'static str,
        /// Human-readable description of the constraint violated.
        reason: String,
    },

    /// Returned when a method name string does not match any known variant.
    #[error("unknown {kind} method \"{value}\" (expected one of: {expected})")]
    UnknownMethod {
        /// Which family of methods was being parsed.
        kind: &'static str,
        /// The unrecognised input.
        value: String,
        /// Comma-separated list of accepted names.
        expected: &'static str,
    },

    /// Returned when max_depth is zero.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when min_samples_split is less than 2.
    #[error("min_samples_split must be at least 2, got {min_samples_split}")]
    InvalidMinSamplesSplit {
        /// The invalid min_samples_split value provided.
        min_samples_split: usize,
    },

    /// Returned when min_samples_leaf is zero.
    #[error("min_samples_leaf must be at least 1, got {min_samples_leaf}")]
    InvalidMinSamplesLeaf {
        /// The invalid min_samples_leaf value provided.
        min_samples_leaf: usize,
    },

    /// Returned when max_features resolves to 0 or exceeds n_features.
    #[error("max_features resolved to {max_features}, but must be in [1, {n_features}]")]
    InvalidMaxFeatures {
        /// The resolved max_features value.
        max_features: usize,
        /// The number of features in the dataset.
        n_features: usize,
    },

    /// Returned when an operation runs before `initialize`.
    #[error("{operation} called before initialize")]
    NotInitialized {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// Returned when an operation needs a trained model.
    #[error("{operation} requires a trained model")]
    NotTrained {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// Returned when `train` is called on an already trained ensemble.
    #[error("ensemble is already trained")]
    AlreadyTrained,

    /// Returned for any operation after `dispose`.
    #[error("{operation} called after dispose")]
    Disposed {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// Returned when training or prediction runs before `create_ensemble`.
    #[error("no ensemble members: call create_ensemble first")]
    EnsembleNotCreated,

    /// Returned when feature selection runs before any importance analysis.
    #[error("feature importances have not been computed")]
    ImportancesNotComputed,

    /// Returned when the dataset has zero samples.
    #[error("dataset has zero samples")]
    EmptyDataset,

    /// Returned when the dataset has zero feature columns.
    #[error("dataset has zero feature columns")]
    ZeroFeatures,

    /// Returned when a sample has a different number of features than expected.
    #[error("sample {sample_index} has {got} features, expected {expected}")]
    FeatureCountMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the sample.
        got: usize,
        /// The zero-based index of the offending sample.
        sample_index: usize,
    },

    /// Returned when the label vector and feature rows differ in length.
    #[error("{n_rows} feature rows but {n_labels} labels")]
    LabelCountMismatch {
        /// Number of feature rows.
        n_rows: usize,
        /// Number of labels.
        n_labels: usize,
    },

    /// Returned when the number of feature names differs from the column count.
    #[error("{n_names} feature names for {n_features} feature columns")]
    FeatureNameCountMismatch {
        /// Number of names supplied.
        n_names: usize,
        /// Number of feature columns.
        n_features: usize,
    },

    /// Returned when sample weights are not parallel to the samples.
    #[error("{n_weights} sample weights for {n_samples} samples")]
    WeightCountMismatch {
        /// Number of weights supplied.
        n_weights: usize,
        /// Number of samples.
        n_samples: usize,
    },

    /// Returned when a feature value is NaN or infinite.
    #[error("non-finite value at sample {sample_index}, feature {feature_index}")]
    NonFiniteValue {
        /// The zero-based index of the offending sample.
        sample_index: usize,
        /// The zero-based index of the offending feature column.
        feature_index: usize,
    },

    /// Returned when a label is NaN or infinite.
    #[error("non-finite label at sample {sample_index}")]
    NonFiniteLabel {
        /// The zero-based index of the offending sample.
        sample_index: usize,
    },

    /// Returned when a sample has a different number of features at prediction time.
    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the prediction input.
        got: usize,
    },

    /// Returned when a linear system cannot be solved.
    #[error("singular {size}x{size} system in weighted least squares")]
    SingularSystem {
        /// Dimension of the system.
        size: usize,
    },
}

impl EnsembleError {
    /// Classify this error into the configuration / state / data taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEnsembleSize { .. }
            | Self::StackingTooFewMembers { .. }
            | Self::InvalidSubsampleRatio { .. }
            | Self::InvalidThreshold { .. }
            | Self::InvalidParameter { .. }
            | Self::UnknownMethod { .. }
            | Self::InvalidMaxDepth { .. }
            | Self::InvalidMinSamplesSplit { .. }
            | Self::InvalidMinSamplesLeaf { .. }
            | Self::InvalidMaxFeatures { .. } => ErrorKind::Configuration,
            Self::NotInitialized { .. }
            | Self::NotTrained { .. }
            | Self::AlreadyTrained
            | Self::Disposed { .. }
            | Self::EnsembleNotCreated
            | Self::ImportancesNotComputed => ErrorKind::State,
            Self::EmptyDataset
            | Self::ZeroFeatures
            | Self::FeatureCountMismatch { .. }
            | Self::LabelCountMismatch { .. }
            | Self::FeatureNameCountMismatch { .. }
            | Self::WeightCountMismatch { .. }
            | Self::NonFiniteValue { .. }
            | Self::NonFiniteLabel { .. }
            | Self::PredictionFeatureMismatch { .. }
            | Self::SingularSystem { .. } => ErrorKind::Data,
        }
    }
}

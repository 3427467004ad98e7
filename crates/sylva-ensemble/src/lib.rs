//! Tree ensembles with feature analysis, uncertainty and explanations.
//!
//! Provides weighted CART trees combined by bagging, boosting or stacking,
//! Gini / permutation / ablation feature importance with correlation-aware
//! selection, entropy and variance uncertainty with Platt-style
//! calibration, and LIME, ablation and counterfactual local explanations.
//! [`DecisionTreeEnsemble`] ties them together behind one lifecycle.

mod config;
mod confusion;
mod dataset;
mod dense;
mod ensemble;
mod error;
mod explain;
mod feature_analysis;
mod learner;
mod node;
mod orchestrator;
mod sampling;
mod split;
mod tree;
mod uncertainty;

pub use config::{
    CalibrationMethod, EnsembleConfig, EnsembleMethod, ExplainabilityConfig, ExplanationMethod,
    FeatureAnalyzerConfig, ImportanceMethod, SylvaConfig, UncertaintyConfig, UncertaintyMethod,
    VotingStrategy,
};
pub use confusion::{ClassMetrics, ConfusionMatrix};
pub use dataset::Dataset;
pub use dense::{LogisticUnit, TwoLayerRegressor};
pub use ensemble::{
    BOOSTING_EPSILON, BoostingRound, EnsembleManager, Member, TrainingReport, ValidationMetrics,
    aggregate,
};
pub use error::{EnsembleError, ErrorKind};
pub use explain::{ExplainabilityEngine, Explanation};
pub use feature_analysis::{FeatureAnalyzer, FeatureScores, RankedFeature, correlation_matrix};
pub use learner::{FitHistory, Learner, Predictor, finite_difference_gradient};
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use orchestrator::{
    DecisionTreeEnsemble, EvaluationReport, LifecycleState, Prediction, TrainingSummary,
};
pub use sampling::{bootstrap_draw_count, create_bootstrap_sample};
pub use split::SplitCriterion;
pub use tree::{DecisionTree, DecisionTreeConfig, MaxFeatures, TreeLearner};
pub use uncertainty::{UncertaintyHandler, UncertaintyMetrics, expected_calibration_error};

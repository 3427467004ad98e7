use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    EnsembleError,
    dataset::{class_indices, validate_features, validate_labels},
    learner::{FitHistory, Learner, Predictor, resolve_weights, weighted_mse},
    node::{Node, NodeIndex},
    split::{NodeStats, SplitCriterion, TrainingView, find_best_split},
};

/// Strategy for determining the number of features to consider at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Square root of total features.
    Sqrt,
    /// Log base 2 of total features.
    Log2,
    /// A fraction of total features (must be in (0.0, 1.0]).
    Fraction(f64),
    /// A fixed count.
    Fixed(usize),
    /// All features (no subsampling).
    All,
}

impl MaxFeatures {
    /// Resolve to a concrete count for `n_features` columns.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::InvalidMaxFeatures`] when the count falls
    /// outside `[1, n_features]`.
    pub fn resolve(self, n_features: usize) -> Result<usize, EnsembleError> {
        let resolved = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil().max(1.0) as usize,
            MaxFeatures::Fraction(f) => (n_features as f64 * f).ceil() as usize,
            MaxFeatures::Fixed(n) => n,
            MaxFeatures::All => n_features,
        };
        if resolved == 0 || resolved > n_features {
            return Err(EnsembleError::InvalidMaxFeatures {
                max_features: resolved,
                n_features,
            });
        }
        Ok(resolved)
    }
}

/// Configuration for a single weighted CART decision tree.
///
/// Construct via [`DecisionTreeConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter           | Default             |
/// |---------------------|---------------------|
/// | `criterion`         | `Gini`              |
/// | `max_depth`         | `Some(6)`           |
/// | `min_samples_split` | 2                   |
/// | `min_samples_leaf`  | 1                   |
/// | `max_features`      | `All`               |
/// | `seed`              | 42                  |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionTreeConfig {
    pub(crate) criterion: SplitCriterion,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) max_features: MaxFeatures,
    pub(crate) seed: u64,
}

impl DecisionTreeConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            criterion: SplitCriterion::Gini,
            max_depth: Some(6),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            seed: 42,
        }
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the maximum tree depth.
    ///
    /// `None` means grow until all leaves are pure or stopping conditions
    /// are met. `Some(d)` limits depth to `d` levels (root is depth 0).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the minimum number of samples required to attempt a split.
    #[must_use]
    pub fn with_min_samples_split(mut self, min_samples_split: usize) -> Self {
        self.min_samples_split = min_samples_split;
        self
    }

    /// Set the minimum number of samples required in each leaf after a split.
    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Set the number of features considered at each split.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the split criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Return the maximum depth limit, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the minimum samples required to split a node.
    #[must_use]
    pub fn min_samples_split(&self) -> usize {
        self.min_samples_split
    }

    /// Return the minimum samples required in each leaf.
    #[must_use]
    pub fn min_samples_leaf(&self) -> usize {
        self.min_samples_leaf
    }

    /// Return the max features strategy.
    #[must_use]
    pub fn max_features(&self) -> MaxFeatures {
        self.max_features
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check the hyperparameters without touching any data.
    ///
    /// # Errors
    ///
    /// [`EnsembleError::InvalidMaxDepth`], [`EnsembleError::InvalidMinSamplesSplit`]
    /// or [`EnsembleError::InvalidMinSamplesLeaf`].
    pub fn validate(&self) -> Result<(), EnsembleError> {
        if let Some(d) = self.max_depth
            && d == 0
        {
            return Err(EnsembleError::InvalidMaxDepth { max_depth: 0 });
        }
        if self.min_samples_split < 2 {
            return Err(EnsembleError::InvalidMinSamplesSplit {
                min_samples_split: self.min_samples_split,
            });
        }
        if self.min_samples_leaf < 1 {
            return Err(EnsembleError::InvalidMinSamplesLeaf {
                min_samples_leaf: self.min_samples_leaf,
            });
        }
        Ok(())
    }

    /// Train a decision tree on the provided row-major dataset.
    ///
    /// `features[sample_idx][feature_idx]`, row-major.
    /// `targets[sample_idx]`: numeric targets; class criteria rank the
    /// distinct target values into classes, leaves store the weighted mean.
    ///
    /// # Errors
    ///
    /// | Variant                                    | When                                          |
    /// |--------------------------------------------|-----------------------------------------------|
    /// | [`EnsembleError::EmptyDataset`]            | `features` is empty                           |
    /// | [`EnsembleError::ZeroFeatures`]            | rows have zero feature columns                |
    /// | [`EnsembleError::FeatureCountMismatch`]    | rows have inconsistent lengths                |
    /// | [`EnsembleError::NonFiniteValue`]          | any value is NaN or infinite                  |
    /// | [`EnsembleError::LabelCountMismatch`]      | `targets.len() != features.len()`             |
    /// | [`EnsembleError::WeightCountMismatch`]     | weights are not parallel to the samples       |
    /// | [`EnsembleError::InvalidMaxFeatures`]      | `max_features` resolves outside [1, n]        |
    /// | [`EnsembleError::InvalidMaxDepth`]         | `max_depth` is `Some(0)`                      |
    /// | [`EnsembleError::InvalidMinSamplesSplit`]  | `min_samples_split` < 2                       |
    /// | [`EnsembleError::InvalidMinSamplesLeaf`]   | `min_samples_leaf` < 1                        |
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn fit(
        &self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<DecisionTree, EnsembleError> {
        let n_features = validate_features(features)?;
        validate_labels(targets, features.len())?;
        let weights = resolve_weights(sample_weights, features.len())?;
        self.validate()?;
        let max_features = self.max_features.resolve(n_features)?;

        let (classes, n_classes) = class_indices(targets);

        // Column-major layout for split finding.
        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|feat_idx| features.iter().map(|row| row[feat_idx]).collect())
            .collect();

        let view = TrainingView {
            columns: &columns,
            targets,
            classes: &classes,
            weights: &weights,
            n_classes,
        };

        let sample_indices: Vec<usize> = (0..features.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut arena: Vec<Node> = Vec::new();

        let root = build_tree(
            &view,
            &sample_indices,
            self,
            0,
            max_features,
            &mut rng,
            &mut arena,
        );

        debug!(
            root_index = root.index(),
            n_nodes = arena.len(),
            n_classes,
            "decision tree built"
        );

        Ok(DecisionTree {
            nodes: arena,
            n_features,
        })
    }
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively build the arena-based decision tree.
///
/// Returns the [`NodeIndex`] of the node just created in `arena`.
fn build_tree(
    view: &TrainingView<'_>,
    sample_indices: &[usize],
    config: &DecisionTreeConfig,
    depth: usize,
    max_features: usize,
    rng: &mut ChaCha8Rng,
    arena: &mut Vec<Node>,
) -> NodeIndex {
    let stats = NodeStats::collect(view, sample_indices);
    let impurity = config.criterion.node_impurity(&stats);

    let make_leaf = |arena: &mut Vec<Node>| -> NodeIndex {
        let idx = arena.len();
        arena.push(Node::Leaf {
            value: stats.mean(),
            impurity,
            weight: stats.weight,
        });
        NodeIndex::new(idx)
    };

    let depth_exceeded = config.max_depth.is_some_and(|max_d| depth >= max_d);
    let too_few = sample_indices.len() < config.min_samples_split;
    let pure = impurity.value() <= 1e-12;

    if too_few || pure || depth_exceeded || stats.weight <= 0.0 {
        return make_leaf(arena);
    }

    let Some(split) = find_best_split(
        view,
        sample_indices,
        config.criterion,
        max_features,
        config.min_samples_leaf,
        rng,
    ) else {
        return make_leaf(arena);
    };

    // Arena pattern: reserve index, recurse, then overwrite with the split.
    let node_idx = arena.len();
    arena.push(Node::Leaf {
        value: stats.mean(),
        impurity,
        weight: stats.weight,
    });

    let left = build_tree(
        view,
        &split.left_indices,
        config,
        depth + 1,
        max_features,
        rng,
        arena,
    );
    let right = build_tree(
        view,
        &split.right_indices,
        config,
        depth + 1,
        max_features,
        rng,
        arena,
    );

    arena[node_idx] = Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
        impurity,
        weight: stats.weight,
        impurity_decrease: split.impurity_decrease,
    };

    NodeIndex::new(node_idx)
}

/// A fitted weighted CART decision tree.
///
/// Stored as an arena-based `Vec<Node>` with index references.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_features: usize,
}

impl DecisionTree {
    /// Predict the leaf value for a single sample.
    ///
    /// Traverses from the root (index 0): at each `Split`, goes left when
    /// `sample[feature] <= threshold`, right otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`EnsembleError::PredictionFeatureMismatch`] when `sample.len() != n_features`.
    pub fn predict(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
        if sample.len() != self.n_features {
            return Err(EnsembleError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: sample.len(),
            });
        }
        match &self.nodes[self.traverse(sample)] {
            Node::Leaf { value, .. } => Ok(*value),
            Node::Split { .. } => unreachable!("traverse always ends at a leaf"),
        }
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Borrow the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn traverse(&self, sample: &[f64]) -> usize {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    idx = if sample[feature.index()] <= *threshold {
                        left.index()
                    } else {
                        right.index()
                    };
                }
            }
        }
    }
}

/// A decision tree as an ensemble member: configuration plus optional fit.
#[derive(Debug, Clone)]
pub struct TreeLearner {
    config: DecisionTreeConfig,
    tree: Option<DecisionTree>,
}

impl TreeLearner {
    /// Create an unfitted learner.
    #[must_use]
    pub fn new(config: DecisionTreeConfig) -> Self {
        Self { config, tree: None }
    }

    /// Borrow the fitted tree, if any.
    #[must_use]
    pub fn tree(&self) -> Option<&DecisionTree> {
        self.tree.as_ref()
    }

    /// Borrow the configuration.
    #[must_use]
    pub fn config(&self) -> &DecisionTreeConfig {
        &self.config
    }
}

impl Predictor for TreeLearner {
    fn n_features(&self) -> usize {
        self.tree.as_ref().map_or(0, |t| t.n_features)
    }

    fn is_fitted(&self) -> bool {
        self.tree.is_some()
    }

    fn predict_one(&self, sample: &[f64]) -> Result<f64, EnsembleError> {
        self.tree
            .as_ref()
            .ok_or(EnsembleError::NotTrained {
                operation: "tree predict",
            })?
            .predict(sample)
    }
}

impl Learner for TreeLearner {
    fn name(&self) -> &'static str {
        "decision_tree"
    }

    fn fit(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        sample_weights: Option<&[f64]>,
    ) -> Result<FitHistory, EnsembleError> {
        let tree = self.config.fit(features, targets, sample_weights)?;
        let predictions = features
            .iter()
            .map(|row| tree.predict(row))
            .collect::<Result<Vec<_>, _>>()?;
        let weights = resolve_weights(sample_weights, features.len())?;
        let final_loss = weighted_mse(&predictions, targets, &weights);
        self.tree = Some(tree);
        Ok(FitHistory {
            epochs: 1,
            final_loss,
        })
    }

    fn fresh(&self) -> Box<dyn Learner> {
        Box::new(TreeLearner::new(self.config.clone()))
    }

    fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
    }

    fn model_size(&self) -> usize {
        self.tree.as_ref().map_or(0, DecisionTree::n_nodes)
    }
}

//! Split criteria, per-node label statistics and the best-split search
//! used by the tree builder.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::node::{FeatureIndex, Impurity};

/// Criterion for measuring the quality of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    /// Gini impurity: 1 - Σ(p_i²)
    Gini,
    /// Information entropy: -Σ(p_i · ln(p_i))
    Entropy,
    /// Weighted variance of the targets (regression).
    Variance,
}

impl SplitCriterion {
    /// Compute a class-based impurity from (possibly fractional) class weights.
    ///
    /// Returns [`Impurity::new(0.0)`] when `total` is zero, so an empty
    /// partition never produces NaN.
    ///
    /// For `Gini`: `1 - Σ(p_i²)` where `p_i = weight_i / total`.
    /// For `Entropy`: `-Σ(p_i · ln(p_i))` summed only over classes where `p_i > 0`.
    /// `Variance` has no class form and is treated as `Gini` here.
    #[must_use]
    pub fn impurity(&self, class_weights: &[f64], total: f64) -> Impurity {
        if total <= 0.0 {
            return Impurity::new(0.0);
        }
        let value = match self {
            // Reached only by direct callers; node_impurity scores Variance
            // from label moments.
            SplitCriterion::Gini | SplitCriterion::Variance => {
                let sum_sq: f64 = class_weights
                    .iter()
                    .map(|&c| {
                        let p = c / total;
                        p * p
                    })
                    .sum();
                1.0 - sum_sq
            }
            SplitCriterion::Entropy => {
                -class_weights
                    .iter()
                    .filter(|&&c| c > 0.0)
                    .map(|&c| {
                        let p = c / total;
                        p * p.ln()
                    })
                    .sum::<f64>()
            }
        };
        Impurity::new(value.max(0.0))
    }

    /// Impurity of a node given its accumulated statistics.
    pub(crate) fn node_impurity(&self, stats: &NodeStats) -> Impurity {
        match self {
            SplitCriterion::Gini | SplitCriterion::Entropy => {
                self.impurity(&stats.class_weights, stats.weight)
            }
            SplitCriterion::Variance => {
                if stats.weight <= 0.0 {
                    return Impurity::new(0.0);
                }
                let mean = stats.sum_y / stats.weight;
                Impurity::new((stats.sum_y2 / stats.weight - mean * mean).max(0.0))
            }
        }
    }
}

/// Weighted sufficient statistics for one node.
#[derive(Debug, Clone)]
pub(crate) struct NodeStats {
    pub(crate) class_weights: Vec<f64>,
    pub(crate) weight: f64,
    pub(crate) sum_y: f64,
    pub(crate) sum_y2: f64,
}

impl NodeStats {
    pub(crate) fn empty(n_classes: usize) -> Self {
        Self {
            class_weights: vec![0.0; n_classes],
            weight: 0.0,
            sum_y: 0.0,
            sum_y2: 0.0,
        }
    }

    pub(crate) fn collect(view: &TrainingView<'_>, sample_indices: &[usize]) -> Self {
        let mut stats = Self::empty(view.n_classes);
        for &si in sample_indices {
            stats.add(view, si);
        }
        stats
    }

    pub(crate) fn add(&mut self, view: &TrainingView<'_>, si: usize) {
        let w = view.weights[si];
        let y = view.targets[si];
        self.class_weights[view.classes[si]] += w;
        self.weight += w;
        self.sum_y += w * y;
        self.sum_y2 += w * y * y;
    }

    pub(crate) fn remove(&mut self, view: &TrainingView<'_>, si: usize) {
        let w = view.weights[si];
        let y = view.targets[si];
        self.class_weights[view.classes[si]] -= w;
        self.weight -= w;
        self.sum_y -= w * y;
        self.sum_y2 -= w * y * y;
    }

    /// Weighted mean target, or 0 for an empty node.
    pub(crate) fn mean(&self) -> f64 {
        if self.weight > 0.0 {
            self.sum_y / self.weight
        } else {
            0.0
        }
    }
}

/// Borrowed training data in the layout split-finding needs.
///
/// `columns` is column-major: `columns[feature_idx][sample_idx]`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrainingView<'a> {
    pub(crate) columns: &'a [Vec<f64>],
    pub(crate) targets: &'a [f64],
    pub(crate) classes: &'a [usize],
    pub(crate) weights: &'a [f64],
    pub(crate) n_classes: usize,
}

/// Result of finding the best split for a node.
#[derive(Debug, Clone)]
pub(crate) struct SplitResult {
    /// Feature used for the split.
    pub(crate) feature: FeatureIndex,
    /// Threshold value.
    pub(crate) threshold: f64,
    /// Weighted impurity decrease from this split.
    pub(crate) impurity_decrease: f64,
    /// Sample indices going to the left child.
    pub(crate) left_indices: Vec<usize>,
    /// Sample indices going to the right child.
    pub(crate) right_indices: Vec<usize>,
}

/// Find the best split among a random subset of features.
///
/// For each of `max_features` randomly chosen features, sorts the samples
/// by value, scans left-to-right moving one sample at a time from the right
/// statistics to the left, and keeps the split with the largest weighted
/// impurity decrease.
///
/// Returns `None` when no valid split exists (all values identical,
/// or every boundary would violate `min_samples_leaf`).
pub(crate) fn find_best_split(
    view: &TrainingView<'_>,
    sample_indices: &[usize],
    criterion: SplitCriterion,
    max_features: usize,
    min_samples_leaf: usize,
    rng: &mut impl Rng,
) -> Option<SplitResult> {
    let n_features = view.columns.len();
    let n_samples = sample_indices.len();

    if n_samples < 2 || n_features == 0 {
        return None;
    }

    let parent = NodeStats::collect(view, sample_indices);
    let parent_impurity = criterion.node_impurity(&parent);

    // Partial Fisher-Yates: shuffle only the first `max_features` positions.
    let mut feature_order: Vec<usize> = (0..n_features).collect();
    let take = max_features.min(n_features);
    for i in 0..take {
        let j = rng.gen_range(i..n_features);
        feature_order.swap(i, j);
    }

    let mut best_decrease = f64::NEG_INFINITY;
    let mut best: Option<(FeatureIndex, f64)> = None;

    for &feat_idx in &feature_order[..take] {
        let col = &view.columns[feat_idx];

        let mut sorted: Vec<(f64, usize)> = sample_indices.iter().map(|&si| (col[si], si)).collect();
        sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = NodeStats::empty(view.n_classes);
        let mut right = parent.clone();

        for i in 0..(n_samples - 1) {
            let (val_i, si) = sorted[i];
            left.add(view, si);
            right.remove(view, si);

            let n_left = i + 1;
            let n_right = n_samples - n_left;

            let val_next = sorted[i + 1].0;
            if val_i == val_next {
                continue;
            }
            if n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let decrease = parent.weight * parent_impurity.value()
                - left.weight * criterion.node_impurity(&left).value()
                - right.weight * criterion.node_impurity(&right).value();

            if decrease > best_decrease {
                best_decrease = decrease;
                best = Some((FeatureIndex::new(feat_idx), (val_i + val_next) / 2.0));
            }
        }
    }

    let (feature, threshold) = best?;

    let col = &view.columns[feature.index()];
    let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
        sample_indices.iter().copied().partition(|&si| col[si] <= threshold);

    Some(SplitResult {
        feature,
        threshold,
        impurity_decrease: best_decrease.max(0.0),
        left_indices,
        right_indices,
    })
}

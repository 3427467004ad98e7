//! Per-feature importance and correlation-based feature selection.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::{FeatureAnalyzerConfig, ImportanceMethod};
use crate::dataset::{class_indices, validate_features, validate_labels};
use crate::error::EnsembleError;
use crate::split::SplitCriterion;

/// Guard added to column standard deviations before standardising.
const STD_GUARD: f64 = 1e-7;

/// A ranked feature with name, importance score, and rank.
#[derive(Debug, Clone, Serialize)]
pub struct RankedFeature {
    /// Feature name.
    pub name: String,
    /// Importance score.
    pub importance: f64,
    /// 1-based rank (1 = most important).
    pub rank: usize,
}

/// Importance per feature, in original column order.
///
/// Scores are non-negative. Replaced wholesale by every analysis.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureScores {
    method: ImportanceMethod,
    names: Vec<String>,
    scores: Vec<f64>,
    /// Standard deviation across permutation repeats; `None` for other methods.
    std: Option<Vec<f64>>,
}

impl FeatureScores {
    /// Return the method that produced the scores.
    #[must_use]
    pub fn method(&self) -> ImportanceMethod {
        self.method
    }

    /// Return the score of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.scores[i])
    }

    /// Iterate `(name, score)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
    }

    /// Return the feature names in column order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Return the scores in column order.
    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Return the permutation standard deviations, if any.
    #[must_use]
    pub fn std(&self) -> Option<&[f64]> {
        self.std.as_deref()
    }

    /// Return the number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Return `true` when there are no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Features sorted by importance descending, ties by column index,
    /// with 1-based ranks.
    #[must_use]
    pub fn ranked(&self) -> Vec<RankedFeature> {
        let mut order: Vec<usize> = (0..self.scores.len()).collect();
        order.sort_by(|&a, &b| self.scores[b].total_cmp(&self.scores[a]).then(a.cmp(&b)));
        order
            .into_iter()
            .enumerate()
            .map(|(i, col)| RankedFeature {
                name: self.names[col].clone(),
                importance: self.scores[col],
                rank: i + 1,
            })
            .collect()
    }
}

/// Ranks features and selects a decorrelated subset.
#[derive(Debug, Clone)]
pub struct FeatureAnalyzer {
    config: FeatureAnalyzerConfig,
    importances: Option<FeatureScores>,
}

impl FeatureAnalyzer {
    /// Create an analyzer with no stored importances.
    ///
    /// # Errors
    ///
    /// Any error from [`FeatureAnalyzerConfig::validate`].
    pub fn new(config: FeatureAnalyzerConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        Ok(Self {
            config,
            importances: None,
        })
    }

    /// Compute importances with the configured method and store them,
    /// replacing any previous result.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | Data errors | Malformed features or labels |
    /// | [`EnsembleError::FeatureNameCountMismatch`] | `names.len()` differs from the column count |
    #[instrument(skip_all, fields(method = %self.config.importance_method, n_samples = features.len()))]
    pub fn analyze_features(
        &mut self,
        features: &[Vec<f64>],
        labels: &[f64],
        names: &[String],
    ) -> Result<FeatureScores, EnsembleError> {
        let n_features = validate_features(features)?;
        validate_labels(labels, features.len())?;
        check_names(names, n_features)?;

        let columns = to_columns(features, n_features);
        let (scores, std) = match self.config.importance_method {
            ImportanceMethod::Gini => (gini_importance(&columns, labels), None),
            ImportanceMethod::Permutation => {
                let (mean, std) = permutation_importance(
                    &columns,
                    labels,
                    self.config.permutation_repeats,
                    self.config.seed,
                );
                (mean, Some(std))
            }
            ImportanceMethod::Shap => (ablation_importance(&columns, labels), None),
        };

        let result = FeatureScores {
            method: self.config.importance_method,
            names: names.to_vec(),
            scores,
            std,
        };
        if let Some(top) = result.ranked().first() {
            info!(n_features, top = %top.name, importance = top.importance, "features analyzed");
        }
        self.importances = Some(result.clone());
        Ok(result)
    }

    /// Select features by importance, dropping near-duplicates.
    ///
    /// Returns every name when selection is disabled. Otherwise candidates
    /// below `min_feature_importance` are rejected and the rest are visited
    /// by importance descending (ties by column index); a candidate is kept
    /// unless its absolute correlation with an already kept feature exceeds
    /// `correlation_threshold`. The result is in visiting order.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::ImportancesNotComputed`] | Selection enabled and no prior analysis |
    /// | Data errors | Malformed features |
    /// | [`EnsembleError::FeatureNameCountMismatch`] | `names.len()` differs from the column count |
    pub fn select_features(
        &self,
        features: &[Vec<f64>],
        names: &[String],
    ) -> Result<Vec<String>, EnsembleError> {
        if !self.config.use_feature_selection {
            return Ok(names.to_vec());
        }
        let importances = self
            .importances
            .as_ref()
            .ok_or(EnsembleError::ImportancesNotComputed)?;
        let n_features = validate_features(features)?;
        check_names(names, n_features)?;

        let scores: Vec<f64> = names
            .iter()
            .map(|n| importances.get(n).unwrap_or(0.0))
            .collect();
        let mut candidates: Vec<usize> = (0..n_features)
            .filter(|&i| scores[i] >= self.config.min_feature_importance)
            .collect();
        candidates.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let corr = correlation_matrix(features);
        let mut selected: Vec<usize> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let redundant = selected
                .iter()
                .any(|&s| corr[candidate][s].abs() > self.config.correlation_threshold);
            if redundant {
                debug!(feature = %names[candidate], "dropped as correlated");
            } else {
                selected.push(candidate);
            }
        }

        info!(selected = selected.len(), n_features, "features selected");
        Ok(selected.into_iter().map(|i| names[i].clone()).collect())
    }

    /// Return the last computed importances.
    #[must_use]
    pub fn importances(&self) -> Option<&FeatureScores> {
        self.importances.as_ref()
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &FeatureAnalyzerConfig {
        &self.config
    }

    /// Forget stored importances.
    pub fn dispose(&mut self) {
        self.importances = None;
    }
}

fn check_names(names: &[String], n_features: usize) -> Result<(), EnsembleError> {
    if names.len() != n_features {
        return Err(EnsembleError::FeatureNameCountMismatch {
            n_names: names.len(),
            n_features,
        });
    }
    Ok(())
}

fn to_columns(features: &[Vec<f64>], n_features: usize) -> Vec<Vec<f64>> {
    (0..n_features)
        .map(|j| features.iter().map(|row| row[j]).collect())
        .collect()
}

fn column_mean(column: &[f64]) -> f64 {
    column.iter().sum::<f64>() / column.len() as f64
}

/// `1 − min` weighted Gini impurity over every `x < v` / `x >= v` split.
fn gini_importance(columns: &[Vec<f64>], labels: &[f64]) -> Vec<f64> {
    let (classes, n_classes) = class_indices(labels);
    let n = labels.len() as f64;
    columns
        .iter()
        .map(|column| {
            let mut order: Vec<usize> = (0..column.len()).collect();
            order.sort_unstable_by(|&a, &b| column[a].total_cmp(&column[b]));

            let mut right = vec![0.0f64; n_classes];
            for &c in &classes {
                right[c] += 1.0;
            }
            let mut left = vec![0.0f64; n_classes];
            let mut n_left = 0.0;
            let mut best = 1.0f64;

            // Every unique value is a threshold; left holds all x < v.
            let mut i = 0;
            while i < order.len() {
                let v = column[order[i]];
                let weighted = (n_left * SplitCriterion::Gini.impurity(&left, n_left).value()
                    + (n - n_left) * SplitCriterion::Gini.impurity(&right, n - n_left).value())
                    / n;
                best = best.min(weighted);
                while i < order.len() && column[order[i]] == v {
                    let c = classes[order[i]];
                    left[c] += 1.0;
                    right[c] -= 1.0;
                    n_left += 1.0;
                    i += 1;
                }
            }
            (1.0 - best).max(0.0)
        })
        .collect()
}

/// Matches of the threshold-at-mean stump for one column.
fn stump_matches(column: &[f64], mean: f64, targets: &[bool]) -> usize {
    column
        .iter()
        .zip(targets)
        .filter(|(x, t)| (**x > mean) == **t)
        .count()
}

fn binarize_at_mean(labels: &[f64]) -> Vec<bool> {
    let mean = column_mean(labels);
    labels.iter().map(|&l| l > mean).collect()
}

/// Mean and std over `repeats` of the stump accuracy drop per shuffled column.
fn permutation_importance(
    columns: &[Vec<f64>],
    labels: &[f64],
    repeats: usize,
    seed: u64,
) -> (Vec<f64>, Vec<f64>) {
    let targets = binarize_at_mean(labels);
    let total = (columns.len() * labels.len()) as f64;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut means = Vec::with_capacity(columns.len());
    let mut stds = Vec::with_capacity(columns.len());
    for column in columns {
        let mean = column_mean(column);
        let baseline = stump_matches(column, mean, &targets);
        let mut shuffled = column.clone();
        let drops: Vec<f64> = (0..repeats)
            .map(|_| {
                shuffled.shuffle(&mut rng);
                // Only this column's matches change; the others cancel.
                (baseline as f64 - stump_matches(&shuffled, mean, &targets) as f64) / total
            })
            .collect();
        let avg = drops.iter().sum::<f64>() / repeats as f64;
        let var = drops.iter().map(|d| (d - avg).powi(2)).sum::<f64>() / repeats as f64;
        means.push(avg.max(0.0));
        stds.push(var.sqrt());
    }
    (means, stds)
}

/// `|mean(stump_j(x) − E[y])|` per feature.
///
/// An ablation simplification of Shapley values: each feature is scored
/// alone against the expected label rather than over feature coalitions.
fn ablation_importance(columns: &[Vec<f64>], labels: &[f64]) -> Vec<f64> {
    let expected = column_mean(labels);
    columns
        .iter()
        .map(|column| {
            let mean = column_mean(column);
            let contribution = column
                .iter()
                .map(|&x| if x > mean { 1.0 } else { 0.0 } - expected)
                .sum::<f64>()
                / column.len() as f64;
            contribution.abs()
        })
        .collect()
}

/// Pearson correlation matrix of the feature columns.
///
/// Columns are standardised with their population standard deviation plus a
/// small guard, so constant columns correlate 0 with everything.
#[must_use]
pub fn correlation_matrix(features: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(first) = features.first() else {
        return Vec::new();
    };
    let n = features.len() as f64;
    let standardized: Vec<Vec<f64>> = to_columns(features, first.len())
        .into_iter()
        .map(|column| {
            let mean = column_mean(&column);
            let std = (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
            column.iter().map(|x| (x - mean) / (std + STD_GUARD)).collect()
        })
        .collect();

    standardized
        .iter()
        .map(|a| {
            standardized
                .iter()
                .map(|b| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>() / n)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    /// Column 0 equals the label; column 1 is noise.
    fn informative_and_random(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let labels: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        let features = labels
            .iter()
            .map(|&l| vec![l * 2.0 + 1.0, rng.gen_range(0.0..1.0)])
            .collect();
        (features, labels)
    }

    fn analyzer(method: ImportanceMethod) -> FeatureAnalyzer {
        FeatureAnalyzer::new(FeatureAnalyzerConfig::new().with_importance_method(method)).unwrap()
    }

    // --- Importance ---

    #[test]
    fn gini_ranks_informative_feature_first() {
        let (features, labels) = informative_and_random(100);
        let scores = analyzer(ImportanceMethod::Gini)
            .analyze_features(&features, &labels, &names(2))
            .unwrap();
        assert!((scores.scores()[0] - 1.0).abs() < 1e-12);
        assert!(scores.scores()[0] > scores.scores()[1]);
        assert_eq!(scores.ranked()[0].name, "f0");
        assert_eq!(scores.ranked()[0].rank, 1);
    }

    #[test]
    fn gini_of_constant_feature_is_one_minus_parent() {
        let features = vec![vec![1.0]; 4];
        let labels = vec![0.0, 0.0, 1.0, 1.0];
        let scores = gini_importance(&to_columns(&features, 1), &labels);
        assert!((scores[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn permutation_scores_are_non_negative_and_reproducible() {
        let (features, labels) = informative_and_random(80);
        let a = analyzer(ImportanceMethod::Permutation)
            .analyze_features(&features, &labels, &names(2))
            .unwrap();
        let b = analyzer(ImportanceMethod::Permutation)
            .analyze_features(&features, &labels, &names(2))
            .unwrap();
        assert_eq!(a.scores(), b.scores());
        assert!(a.scores().iter().all(|&s| s >= 0.0));
        assert!(a.scores()[0] > a.scores()[1]);
        assert_eq!(a.std().map(<[f64]>::len), Some(2));
    }

    #[test]
    fn shap_scores_are_absolute_contributions() {
        let features = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let labels = vec![1.0, 1.0, 1.0, 1.0];
        let scores = ablation_importance(&to_columns(&features, 1), &labels);
        // Stump fires on 2 of 4 rows: mean(stump) − 1 = −0.5.
        assert!((scores[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn name_count_checked() {
        let (features, labels) = informative_and_random(10);
        let err = analyzer(ImportanceMethod::Gini)
            .analyze_features(&features, &labels, &names(3))
            .unwrap_err();
        assert!(matches!(err, EnsembleError::FeatureNameCountMismatch { .. }));
    }

    // --- Selection ---

    #[test]
    fn correlated_duplicate_is_dropped() {
        let features: Vec<Vec<f64>> = (0..50)
            .map(|i| {
                let x = i as f64;
                vec![x, 2.0 * x + 3.0, ((i * 7) % 11) as f64]
            })
            .collect();
        let labels: Vec<f64> = (0..50).map(|i| if i < 25 { 0.0 } else { 1.0 }).collect();
        let mut fa = FeatureAnalyzer::new(
            FeatureAnalyzerConfig::new()
                .with_correlation_threshold(0.95)
                .with_min_feature_importance(0.0),
        )
        .unwrap();
        fa.analyze_features(&features, &labels, &names(3)).unwrap();
        let selected = fa.select_features(&features, &names(3)).unwrap();
        let kept_duplicates = selected.iter().filter(|n| *n == "f0" || *n == "f1").count();
        assert_eq!(kept_duplicates, 1);
        assert_eq!(selected[0], "f0");
        assert!(selected.contains(&"f2".to_string()));
    }

    #[test]
    fn selection_before_analysis_is_state_error() {
        let fa = FeatureAnalyzer::new(FeatureAnalyzerConfig::new()).unwrap();
        let err = fa.select_features(&[vec![1.0]], &names(1)).unwrap_err();
        assert!(matches!(err, EnsembleError::ImportancesNotComputed));
    }

    #[test]
    fn disabled_selection_returns_all() {
        let fa = FeatureAnalyzer::new(FeatureAnalyzerConfig::new().with_feature_selection(false))
            .unwrap();
        let selected = fa.select_features(&[vec![1.0, 1.0]], &names(2)).unwrap();
        assert_eq!(selected, names(2));
    }

    #[test]
    fn low_importance_rejected() {
        let (features, labels) = informative_and_random(60);
        let mut fa = FeatureAnalyzer::new(
            FeatureAnalyzerConfig::new()
                .with_importance_method(ImportanceMethod::Shap)
                .with_min_feature_importance(0.2),
        )
        .unwrap();
        let scores = fa.analyze_features(&features, &labels, &names(2)).unwrap();
        let selected = fa.select_features(&features, &names(2)).unwrap();
        for name in &selected {
            assert!(scores.get(name).unwrap() >= 0.2);
        }
    }

    #[test]
    fn correlation_of_constant_column_is_zero() {
        let corr = correlation_matrix(&[vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]]);
        assert!(corr[0][1].abs() < 1e-12);
        assert!((corr[0][0] - 1.0).abs() < 1e-6);
    }
}

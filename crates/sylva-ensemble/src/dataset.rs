//! Validated training data.

use crate::error::EnsembleError;

/// A validated, row-major training set.
///
/// Rows and labels always have equal length, every row has the same width,
/// there is one name per feature column, and every value is finite.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    labels: Vec<f64>,
    feature_names: Vec<String>,
}

impl Dataset {
    /// Build a dataset from numeric labels.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::EmptyDataset`] | `features` is empty |
    /// | [`EnsembleError::ZeroFeatures`] | rows have zero columns |
    /// | [`EnsembleError::FeatureCountMismatch`] | rows have inconsistent widths |
    /// | [`EnsembleError::NonFiniteValue`] | a feature is NaN or infinite |
    /// | [`EnsembleError::LabelCountMismatch`] | `labels.len() != features.len()` |
    /// | [`EnsembleError::NonFiniteLabel`] | a label is NaN or infinite |
    /// | [`EnsembleError::FeatureNameCountMismatch`] | one name per column is not satisfied |
    pub fn new(
        features: Vec<Vec<f64>>,
        labels: Vec<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self, EnsembleError> {
        let n_features = validate_features(&features)?;
        validate_labels(&labels, features.len())?;
        if feature_names.len() != n_features {
            return Err(EnsembleError::FeatureNameCountMismatch {
                n_names: feature_names.len(),
                n_features,
            });
        }
        Ok(Self {
            features,
            labels,
            feature_names,
        })
    }

    /// Build a dataset from zero-based categorical class labels.
    ///
    /// # Errors
    ///
    /// Same as [`Dataset::new`].
    pub fn from_classes(
        features: Vec<Vec<f64>>,
        classes: &[usize],
        feature_names: Vec<String>,
    ) -> Result<Self, EnsembleError> {
        let labels = classes.iter().map(|&c| c as f64).collect();
        Self::new(features, labels, feature_names)
    }

    /// Return the feature rows.
    #[must_use]
    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    /// Return the labels.
    #[must_use]
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// Return the feature names.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Return the number of samples.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.features.len()
    }

    /// Return the number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Return a copy restricted to the given column indices, in that order.
    #[must_use]
    pub fn project(&self, columns: &[usize]) -> Dataset {
        Dataset {
            features: project_rows(&self.features, columns),
            labels: self.labels.clone(),
            feature_names: columns
                .iter()
                .map(|&c| self.feature_names[c].clone())
                .collect(),
        }
    }
}

/// Validate a row-major feature matrix and return its column count.
pub(crate) fn validate_features(features: &[Vec<f64>]) -> Result<usize, EnsembleError> {
    if features.is_empty() {
        return Err(EnsembleError::EmptyDataset);
    }
    let n_features = features[0].len();
    if n_features == 0 {
        return Err(EnsembleError::ZeroFeatures);
    }
    for (sample_index, row) in features.iter().enumerate() {
        if row.len() != n_features {
            return Err(EnsembleError::FeatureCountMismatch {
                expected: n_features,
                got: row.len(),
                sample_index,
            });
        }
        for (feature_index, &val) in row.iter().enumerate() {
            if !val.is_finite() {
                return Err(EnsembleError::NonFiniteValue {
                    sample_index,
                    feature_index,
                });
            }
        }
    }
    Ok(n_features)
}

/// Validate a label vector against the number of feature rows.
pub(crate) fn validate_labels(labels: &[f64], n_rows: usize) -> Result<(), EnsembleError> {
    if labels.len() != n_rows {
        return Err(EnsembleError::LabelCountMismatch {
            n_rows,
            n_labels: labels.len(),
        });
    }
    if let Some(sample_index) = labels.iter().position(|l| !l.is_finite()) {
        return Err(EnsembleError::NonFiniteLabel { sample_index });
    }
    Ok(())
}

/// Check every row of a prediction batch against the trained width.
pub(crate) fn validate_batch(features: &[Vec<f64>], expected: usize) -> Result<(), EnsembleError> {
    for (sample_index, row) in features.iter().enumerate() {
        if row.len() != expected {
            return Err(EnsembleError::PredictionFeatureMismatch {
                expected,
                got: row.len(),
            });
        }
        if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
            return Err(EnsembleError::NonFiniteValue {
                sample_index,
                feature_index,
            });
        }
    }
    Ok(())
}

/// Keep only the given columns of every row.
pub(crate) fn project_rows(features: &[Vec<f64>], columns: &[usize]) -> Vec<Vec<f64>> {
    features
        .iter()
        .map(|row| columns.iter().map(|&c| row[c]).collect())
        .collect()
}

/// Map arbitrary label values onto dense class indices.
///
/// Distinct values are sorted ascending; each label becomes the rank of its
/// value. Returns the per-sample class index and the number of classes.
pub(crate) fn class_indices(labels: &[f64]) -> (Vec<usize>, usize) {
    let mut distinct: Vec<f64> = labels.to_vec();
    distinct.sort_unstable_by(|a, b| a.total_cmp(b));
    distinct.dedup();
    let classes = labels
        .iter()
        .map(|l| {
            distinct
                .binary_search_by(|d| d.total_cmp(l))
                .unwrap_or(0)
        })
        .collect();
    (classes, distinct.len().max(1))
}

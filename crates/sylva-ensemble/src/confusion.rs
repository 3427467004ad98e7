//! Confusion matrix and per-class classification metrics.

use std::fmt;

use serde::Serialize;

use crate::error::EnsembleError;

/// A confusion matrix over the distinct label values seen in training.
///
/// Entry `matrix[true_class][predicted_class]` counts how many samples
/// with true label `classes[true_class]` were predicted as
/// `classes[predicted_class]`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfusionMatrix {
    classes: Vec<f64>,
    matrix: Vec<Vec<usize>>,
}

/// Per-class precision, recall, and F1 score.
#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    /// The class label value.
    pub class: f64,
    /// Precision: TP / (TP + FP). 0.0 if no predictions for this class.
    pub precision: f64,
    /// Recall: TP / (TP + FN). 0.0 if no true samples for this class.
    pub recall: f64,
    /// F1: 2 * precision * recall / (precision + recall). 0.0 if both are zero.
    pub f1: f64,
    /// Number of true samples in this class.
    pub support: usize,
}

/// Index of the class value closest to `value`; ties go to the smaller class.
pub(crate) fn nearest_class(classes: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, c) in classes.iter().enumerate() {
        let d = (c - value).abs();
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

impl ConfusionMatrix {
    /// Build a confusion matrix from true labels and raw predictions.
    ///
    /// Both sides are snapped to the nearest entry of `classes`, which must
    /// be sorted ascending.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`EnsembleError::EmptyDataset`] | Zero labels or zero classes provided |
    /// | [`EnsembleError::LabelCountMismatch`] | `predicted.len() != true_labels.len()` |
    pub fn from_predictions(
        true_labels: &[f64],
        predicted: &[f64],
        classes: &[f64],
    ) -> Result<Self, EnsembleError> {
        if true_labels.is_empty() || classes.is_empty() {
            return Err(EnsembleError::EmptyDataset);
        }
        if predicted.len() != true_labels.len() {
            return Err(EnsembleError::LabelCountMismatch {
                n_rows: predicted.len(),
                n_labels: true_labels.len(),
            });
        }
        let n_classes = classes.len();
        let mut matrix = vec![vec![0usize; n_classes]; n_classes];
        for (&t, &p) in true_labels.iter().zip(predicted) {
            matrix[nearest_class(classes, t)][nearest_class(classes, p)] += 1;
        }
        Ok(Self {
            classes: classes.to_vec(),
            matrix,
        })
    }

    /// Overall accuracy: proportion of correct predictions.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_classes()).map(|i| self.matrix[i][i]).sum();
        let total: usize = self.matrix.iter().flat_map(|row| row.iter()).sum();
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }

    /// Per-class precision, recall, F1, and support.
    #[must_use]
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        let n = self.n_classes();
        (0..n)
            .map(|c| {
                let tp = self.matrix[c][c];
                let fp: usize = (0..n).filter(|&i| i != c).map(|i| self.matrix[i][c]).sum();
                let fn_: usize = (0..n).filter(|&j| j != c).map(|j| self.matrix[c][j]).sum();
                let support = tp + fn_;
                let precision = if tp + fp == 0 {
                    0.0
                } else {
                    tp as f64 / (tp + fp) as f64
                };
                let recall = if support == 0 {
                    0.0
                } else {
                    tp as f64 / support as f64
                };
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                ClassMetrics {
                    class: self.classes[c],
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }

    /// Return the underlying matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Return the class label values, ascending.
    #[must_use]
    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>10}", "")?;
        for c in &self.classes {
            write!(f, " pred_{c:>4}")?;
        }
        writeln!(f)?;

        for (c, row) in self.classes.iter().zip(&self.matrix) {
            write!(f, "true_{c:>5}")?;
            for val in row {
                write!(f, " {val:>9}")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let labels = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let cm = ConfusionMatrix::from_predictions(&labels, &labels, &[0.0, 1.0, 2.0]).unwrap();
        assert!((cm.accuracy() - 1.0).abs() < f64::EPSILON);
        for m in cm.class_metrics() {
            assert!((m.f1 - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn raw_scores_snap_to_nearest_class() {
        // 0.3 -> 0, 0.7 -> 1, 0.5 ties to the smaller class.
        let cm = ConfusionMatrix::from_predictions(
            &[0.0, 1.0, 1.0],
            &[0.3, 0.7, 0.5],
            &[0.0, 1.0],
        )
        .unwrap();
        assert_eq!(cm.as_rows()[0], vec![1, 0]);
        assert_eq!(cm.as_rows()[1], vec![1, 1]);
    }

    #[test]
    fn known_confusion_matrix() {
        let truth = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let predicted = vec![0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 0.0];
        let cm = ConfusionMatrix::from_predictions(&truth, &predicted, &[0.0, 1.0, 2.0]).unwrap();
        let metrics = cm.class_metrics();
        assert!((metrics[0].precision - 2.0 / 3.0).abs() < 1e-10);
        assert!((metrics[0].recall - 2.0 / 3.0).abs() < 1e-10);
        assert_eq!(metrics[0].support, 3);
        assert!((cm.accuracy() - 6.0 / 9.0).abs() < 1e-10);
    }

    #[test]
    fn empty_labels_error() {
        let err = ConfusionMatrix::from_predictions(&[], &[], &[0.0]).unwrap_err();
        assert!(matches!(err, EnsembleError::EmptyDataset));
    }

    #[test]
    fn display_formatting() {
        let cm = ConfusionMatrix::from_predictions(&[0.0, 1.0], &[0.0, 1.0], &[0.0, 1.0]).unwrap();
        let output = format!("{cm}");
        assert!(output.contains("pred_"));
        assert!(output.contains("true_"));
    }

    #[test]
    fn zero_support_class_metrics() {
        let labels = vec![0.0, 0.0, 1.0, 1.0];
        let cm = ConfusionMatrix::from_predictions(&labels, &labels, &[0.0, 1.0, 2.0]).unwrap();
        let metrics = cm.class_metrics();
        assert_eq!(metrics[2].support, 0);
        assert!(metrics[2].recall.abs() < f64::EPSILON);
    }
}

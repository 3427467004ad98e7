//! Labelled CSV dataset reader with full input validation.

use std::path::{Path, PathBuf};

use sylva_ensemble::Dataset;
use tracing::{debug, info, instrument};

use crate::IoError;

/// Reads a labelled numeric dataset from a CSV file.
///
/// Expected CSV format:
/// - Header row required; every column is named
/// - One column holds labels (by default the last one); all others are
///   numeric features
/// - All rows must have the same number of columns
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::MissingLabelColumn`] | Named label column absent from the header |
/// | [`IoError::NoFeatureColumns`] | Only the label column present |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::NonFiniteValue`] | Cell is NaN, Inf, or unparseable float |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
pub struct DatasetReader {
    path: PathBuf,
    label_column: Option<String>,
}

impl DatasetReader {
    /// Create a new reader for the given CSV file path. Labels come from the
    /// last column.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            label_column: None,
        }
    }

    /// Take labels from the named column instead of the last one.
    #[must_use]
    pub fn with_label_column(mut self, label: Option<String>) -> Self {
        self.label_column = label;
        self
    }

    /// Read and validate the CSV file, returning a [`Dataset`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<Dataset, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) lets InconsistentRowLength fire instead of CsvParse.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        })?;
        let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();
        let expected_cols = columns.len();
        debug!(expected_cols, "read CSV header");

        let label_index = match &self.label_column {
            Some(label) => columns.iter().position(|c| c == label).ok_or_else(|| {
                IoError::MissingLabelColumn {
                    path: self.path.clone(),
                    label: label.clone(),
                }
            })?,
            None => expected_cols.saturating_sub(1),
        };
        if expected_cols < 2 {
            return Err(IoError::NoFeatureColumns {
                path: self.path.clone(),
            });
        }
        let feature_names: Vec<String> = columns
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != label_index)
            .map(|(_, c)| c.clone())
            .collect();

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| IoError::CsvParse {
                path: self.path.clone(),
                offset: e.position().map_or(0, |p| p.byte()),
                source: e,
            })?;
            if record.len() != expected_cols {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: expected_cols,
                    got: record.len(),
                });
            }

            let mut row = Vec::with_capacity(feature_names.len());
            for (col_index, raw) in record.iter().enumerate() {
                let value = self.parse_cell(raw, row_index, &columns[col_index])?;
                if col_index == label_index {
                    labels.push(value);
                } else {
                    row.push(value);
                }
            }
            features.push(row);
        }

        if features.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        info!(
            n_samples = features.len(),
            n_features = feature_names.len(),
            label = %columns[label_index],
            "dataset loaded"
        );

        Dataset::new(features, labels, feature_names).map_err(|e| IoError::InvalidDataset {
            path: self.path.clone(),
            source: e,
        })
    }

    fn parse_cell(&self, raw: &str, row_index: usize, column: &str) -> Result<f64, IoError> {
        let non_finite = || IoError::NonFiniteValue {
            path: self.path.clone(),
            row_index,
            column: column.to_string(),
            raw: raw.to_string(),
        };
        let value: f64 = raw.trim().parse().map_err(|_| non_finite())?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(non_finite())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn read_with_default_label_column() {
        let csv = "height,width,species\n1.0,2.0,0\n3.0,4.0,1\n5.0,6.0,1\n";
        let f = write_csv(csv);
        let ds = DatasetReader::new(f.path()).read().unwrap();
        assert_eq!(ds.n_samples(), 3);
        assert_eq!(ds.n_features(), 2);
        assert_eq!(ds.feature_names(), &["height", "width"]);
        assert_eq!(ds.labels(), &[0.0, 1.0, 1.0]);
        assert!((ds.features()[1][1] - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn read_with_named_label_column() {
        let csv = "label,a,b\n1,0.5,0.25\n0,1.5,2.5\n";
        let f = write_csv(csv);
        let ds = DatasetReader::new(f.path())
            .with_label_column(Some("label".into()))
            .read()
            .unwrap();
        assert_eq!(ds.feature_names(), &["a", "b"]);
        assert_eq!(ds.labels(), &[1.0, 0.0]);
        assert_eq!(ds.features()[0], vec![0.5, 0.25]);
    }

    #[test]
    fn missing_label_column_error() {
        let f = write_csv("a,b\n1,2\n");
        let err = DatasetReader::new(f.path())
            .with_label_column(Some("target".into()))
            .read()
            .unwrap_err();
        assert!(matches!(err, IoError::MissingLabelColumn { .. }));
    }

    #[test]
    fn empty_dataset_error() {
        let f = write_csv("a,b,label\n");
        let err = DatasetReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::EmptyDataset { .. }));
    }

    #[test]
    fn no_feature_columns_error() {
        let f = write_csv("label\n1\n0\n");
        let err = DatasetReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::NoFeatureColumns { .. }));
    }

    #[test]
    fn inconsistent_row_length_error() {
        let f = write_csv("a,b,label\n1,2,0\n1,0\n");
        let err = DatasetReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::InconsistentRowLength {
                row_index: 1,
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn non_finite_value_error() {
        for bad in ["NaN", "inf", "abc", ""] {
            let f = write_csv(&format!("a,b,label\n1,{bad},0\n"));
            let err = DatasetReader::new(f.path()).read().unwrap_err();
            match err {
                IoError::NonFiniteValue { column, row_index, .. } => {
                    assert_eq!(column, "b");
                    assert_eq!(row_index, 0);
                }
                other => panic!("expected NonFiniteValue for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn file_not_found_error() {
        let err = DatasetReader::new(Path::new("/nonexistent/data.csv"))
            .read()
            .unwrap_err();
        assert!(matches!(err, IoError::FileNotFound { .. }));
    }
}

//! JSON report writer for training, evaluation and explanation outputs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::experiment::ExperimentName;

/// Writes reports as pretty-printed JSON files.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{experiment}_{kind}.json`.
pub struct ReportWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ReportWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    /// Path of the report of the given kind: `{output_dir}/{experiment}_{kind}.json`.
    #[must_use]
    pub fn report_path(&self, kind: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{kind}.json", self.experiment.as_str()))
    }

    /// Serialize `report` to `{experiment}_{kind}.json` and return its path.
    ///
    /// The report is wrapped in an object carrying the experiment name and
    /// kind next to the payload under `report`.
    ///
    /// # Errors
    ///
    /// [`IoError::Serialize`] if the report cannot be encoded,
    /// [`IoError::WriteFile`] if the file cannot be written.
    #[instrument(skip(self, report))]
    pub fn write<T: Serialize>(&self, kind: &str, report: &T) -> Result<PathBuf, IoError> {
        let path = self.report_path(kind);
        let artifact = ReportArtifact {
            experiment: self.experiment.as_str(),
            kind,
            report,
        };
        let json = serde_json::to_string_pretty(&artifact).map_err(|e| IoError::Serialize {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, &json).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        info!(path = %path.display(), "report written");
        Ok(path)
    }
}

#[derive(Serialize)]
struct ReportArtifact<'a, T: Serialize> {
    experiment: &'a str,
    kind: &'a str,
    report: &'a T,
}

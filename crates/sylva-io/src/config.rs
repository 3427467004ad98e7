//! JSON configuration loading.

use std::path::Path;

use sylva_ensemble::SylvaConfig;
use tracing::{info, instrument};

use crate::IoError;

/// Read a [`SylvaConfig`] from a JSON file and validate it.
///
/// Every section and field is optional; missing values take their defaults.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::ConfigParse`] | Not valid JSON for the configuration schema |
/// | [`IoError::InvalidConfig`] | A value fails validation |
#[instrument(fields(path = %path.display()))]
pub fn load_config(path: &Path) -> Result<SylvaConfig, IoError> {
    let text = std::fs::read_to_string(path).map_err(|e| IoError::FileNotFound {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: SylvaConfig = serde_json::from_str(&text).map_err(|e| IoError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate().map_err(|e| IoError::InvalidConfig {
        path: path.to_path_buf(),
        source: e,
    })?;
    info!(
        method = %config.ensemble.method(),
        ensemble_size = config.ensemble.ensemble_size(),
        "configuration loaded"
    );
    Ok(config)
}

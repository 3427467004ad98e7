//! Validated experiment names used to build report file names.

use std::fmt;

use crate::IoError;

/// A validated experiment name matching `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_name() {
        let name = ExperimentName::new("iris-run_01".to_string()).unwrap();
        assert_eq!(name.as_str(), "iris-run_01");
        assert_eq!(name.to_string(), "iris-run_01");
    }

    #[test]
    fn rejects_empty() {
        let name = ExperimentName::new(String::new());
        assert!(matches!(name, Err(IoError::InvalidExperimentName { .. })));
    }

    #[test]
    fn rejects_path_separators() {
        for bad in ["../escape", "a/b", "with space", "dot.json"] {
            let name = ExperimentName::new(bad.to_string());
            assert!(matches!(name, Err(IoError::InvalidExperimentName { .. })), "{bad}");
        }
    }
}

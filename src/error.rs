//! Error types for mdcath-holdout.

use std::path::PathBuf;

/// Result type alias for mdcath-holdout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building a holdout partition.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error during file operations.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        /// The path where the error occurred, if known.
        path: Option<PathBuf>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Arrow error while reading residue tables.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error while writing the assignment manifest.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Malformed or missing input: empty collections, non-finite feature
    /// values, inconsistent feature dimensions.
    #[error("Invalid input: {context}")]
    InvalidInput {
        /// Which domain or group triggered the failure.
        context: String,
    },

    /// A homology component was split between holdout and training.
    #[error("Component {component} split across sets: domain '{domain}' is not with its component")]
    ComponentIntegrity {
        /// Index of the offending component.
        component: usize,
        /// A member found on the wrong side.
        domain: String,
    },

    /// Refinement ran out of iterations without reaching the RI threshold.
    #[error("No representative holdout after {iterations} iterations: best RI {best_ri:.4}, failing: {}", failing.join(", "))]
    ConvergenceFailure {
        /// Number of refinement iterations performed.
        iterations: usize,
        /// Best Representation Index seen.
        best_ri: f64,
        /// Names of the sub-scores below threshold in the best iteration.
        failing: Vec<String>,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Parse error in an input file.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
    },

    /// Serialization error (JSON / YAML).
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an I/O error with a path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Create an I/O error without path context.
    pub fn io_no_path(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }

    /// Create an invalid input error.
    pub fn invalid_input(context: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl std::fmt::Display) -> Self {
        Self::Serialization(message.to_string())
    }

    /// Whether this error must abort the current run.
    ///
    /// Convergence failure is a reportable outcome, everything else is not.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ConvergenceFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/data/cath-domain-list.txt");
        assert!(err.to_string().contains("/data/cath-domain-list.txt"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_no_path(io_err);
        assert!(err.to_string().contains("None"));
    }

    #[test]
    fn test_invalid_input_names_domain() {
        let err = Error::invalid_input("domain '1abcA00' has non-finite feature 'avg_rmsf_320'");
        let msg = err.to_string();
        assert!(msg.contains("1abcA00"));
        assert!(msg.contains("avg_rmsf_320"));
    }

    #[test]
    fn test_component_integrity() {
        let err = Error::ComponentIntegrity {
            component: 7,
            domain: "2xyzB01".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains("2xyzB01"));
    }

    #[test]
    fn test_convergence_failure_lists_axes() {
        let err = Error::ConvergenceFailure {
            iterations: 10,
            best_ri: 0.8512,
            failing: vec![
                "hierarchy_coverage".to_string(),
                "stability_coverage".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("0.8512"));
        assert!(msg.contains("hierarchy_coverage, stability_coverage"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(Error::invalid_input("empty").is_fatal());
        assert!(Error::ComponentIntegrity {
            component: 0,
            domain: "x".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_invalid_config() {
        let err = Error::invalid_config("sample ratio must be in (0, 1)");
        assert!(err.to_string().contains("sample ratio must be in (0, 1)"));
    }

    #[test]
    fn test_parse_error() {
        let err = Error::parse("line 12: class code 'x' is not an integer");
        assert!(err.to_string().contains("line 12"));
    }

    #[test]
    fn test_serialization_error() {
        let err = Error::serialization("expected value at line 1");
        assert!(err.to_string().contains("expected value"));
    }
}

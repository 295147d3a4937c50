//! Error types for unfolding input preparation

use thiserror::Error;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Invalid input data (binnings, shapes, index ranges)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inconsistent configuration; fatal for the whole invocation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Named object absent from a histogram container
    #[error("missing object '{0}'")]
    MissingObject(String),

    /// Numerical failure
    #[error("Computation error: {0}")]
    Computation(String),

    /// Job submission or execution failure
    #[error("Job error: {0}")]
    Job(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::MissingObject("JES_up/truth".into());
        assert_eq!(e.to_string(), "missing object 'JES_up/truth'");

        let e = Error::Config("2 differential bins but 3 binnings".into());
        assert!(e.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}

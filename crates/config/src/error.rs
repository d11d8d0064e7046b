//! Configuration error types.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::validate::ValidationError;

/// Errors produced while loading or validating configuration
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file {path:?}: {source}")]
    #[diagnostic(code(certmint::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a well-formed KDL document
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] kdl::KdlError),

    /// The document is well-formed but does not describe an ACME block
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(certmint::config::invalid))]
    Invalid(String),

    /// One or more fields failed validation
    #[error("configuration validation failed with {} error(s): {}", errors.len(), summarize(errors))]
    #[diagnostic(code(certmint::config::validation))]
    Validation { errors: Vec<ValidationError> },
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

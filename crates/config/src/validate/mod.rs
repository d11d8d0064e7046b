//! Configuration validation
//!
//! Errors make a configuration unusable; warnings are surfaced to the operator
//! but do not block a run.

mod domain;
mod lint;
mod network;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{AcmeConfig, ConfigError};

pub use domain::validate_domain_name;

/// Area of the configuration a finding belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Domain,
    Network,
    Files,
    Keystore,
    Polling,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Domain => "domain",
            ErrorCategory::Network => "network",
            ErrorCategory::Files => "files",
            ErrorCategory::Keystore => "keystore",
            ErrorCategory::Polling => "polling",
        };
        f.write_str(name)
    }
}

/// A blocking validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A non-blocking finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Collected findings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl AcmeConfig {
    /// Validate the configuration.
    ///
    /// Returns the warnings on success, or every error found.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ConfigError> {
        let mut result = ValidationResult::new();
        result.merge(domain::validate(self));
        result.merge(network::validate(self));
        result.merge(validate_files(self));
        result.merge(validate_keystore(self));
        result.merge(validate_polling(self));
        result.merge(lint::lint_config(self));

        for warning in &result.warnings {
            warn!(message = %warning.message, "Configuration warning");
        }

        if result.is_ok() {
            debug!(warnings = result.warnings.len(), "Configuration is valid");
            Ok(result.warnings)
        } else {
            Err(ConfigError::Validation {
                errors: result.errors,
            })
        }
    }
}

fn validate_files(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    let files = &config.files;

    let named = [
        ("account-key", &files.account_key),
        ("domain-key", &files.domain_key),
        ("domain-csr", &files.domain_csr),
        ("domain-chain", &files.domain_chain),
        ("account-credentials", &files.account_credentials),
    ];

    for (name, path) in &named {
        if path.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Files,
                format!("'{}' path must not be empty", name),
            ));
        }
    }

    // The account key must never double as the domain key.
    if files.account_key == files.domain_key {
        result.add_error(ValidationError::new(
            ErrorCategory::Files,
            format!(
                "account-key and domain-key must be different files (both are {:?})",
                files.account_key
            ),
        ));
    }

    result
}

fn validate_keystore(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.keystore.password.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Keystore,
            "keystore password must not be blank",
        ));
    }
    if config.keystore.tool.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Keystore,
            "keystore tool must not be blank",
        ));
    }
    if config.keystore.path.as_os_str().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Keystore,
            "keystore path must not be empty",
        ));
    }

    result
}

fn validate_polling(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.polling.max_attempts == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Polling,
            "polling max-attempts must be at least 1",
        ));
    }

    result
}

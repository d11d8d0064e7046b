//! Network settings validation
//!
//! Checks the ACME directory URL and the challenge listener address.

use std::net::SocketAddr;

use url::Url;

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::AcmeConfig;

/// Validate endpoint and listener settings
pub fn validate(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    match Url::parse(config.directory_url()) {
        Ok(url) if matches!(url.scheme(), "https" | "http") && url.host().is_some() => {}
        Ok(url) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Network,
                format!("ACME endpoint must be an http(s) URL with a host: '{}'", url),
            ));
        }
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Network,
                format!("invalid ACME endpoint '{}': {}", config.directory_url(), e),
            ));
        }
    }

    if let Err(e) = config.challenge_listen.parse::<SocketAddr>() {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            format!(
                "invalid challenge-listen address '{}': {}",
                config.challenge_listen, e
            ),
        ));
    }

    result
}

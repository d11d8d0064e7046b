//! Domain name validation
//!
//! Only a single, fully-qualified, non-wildcard DNS name is accepted.

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::AcmeConfig;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Validate the configured domain
pub fn validate(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(message) = validate_domain_name(&config.domain) {
        result.add_error(ValidationError::new(ErrorCategory::Domain, message));
    }

    result
}

/// Check that `domain` is a single DNS name a certificate can be issued for
pub fn validate_domain_name(domain: &str) -> Result<(), String> {
    if domain.trim().is_empty() {
        return Err("domain is required".to_string());
    }
    if domain.contains('*') {
        return Err(format!("wildcard domains are not supported: '{}'", domain));
    }
    if domain.contains(|c: char| c == ',' || c.is_whitespace()) {
        return Err(format!("exactly one domain is supported: '{}'", domain));
    }
    if domain.len() > MAX_NAME_LEN {
        return Err(format!(
            "domain is longer than {} characters: '{}'",
            MAX_NAME_LEN, domain
        ));
    }

    let name = domain.strip_suffix('.').unwrap_or(domain);
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(format!("domain must be fully qualified: '{}'", domain));
    }

    for label in labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(format!(
                "domain label must be 1-{} characters: '{}'",
                MAX_LABEL_LEN, domain
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!(
                "domain label must not start or end with '-': '{}'",
                domain
            ));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("domain contains invalid characters: '{}'", domain));
        }
    }

    Ok(())
}

//! Configuration linting
//!
//! Flags settings that work but are likely mistakes in production.

use super::{ValidationResult, ValidationWarning};
use crate::{AcmeConfig, KeystoreConfig, LETSENCRYPT_STAGING};

/// Lint configuration for likely mistakes
pub fn lint_config(config: &AcmeConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.enabled && !config.accept_terms_of_service {
        result.add_warning(ValidationWarning::new(
            "accept-terms-of-service is off; issuance fails if the authority requires agreement",
        ));
    }

    if config.keystore.password == KeystoreConfig::default().password {
        result.add_warning(ValidationWarning::new(
            "keystore password is the built-in default (consider setting keystore.password)",
        ));
    }

    if config.directory_url() == LETSENCRYPT_STAGING {
        result.add_warning(ValidationWarning::new(
            "using the Let's Encrypt staging directory; issued certificates are not publicly trusted",
        ));
    }

    if config.polling.interval_secs == 0 {
        result.add_warning(ValidationWarning::new(
            "polling interval is 0 seconds; status checks will be sent back to back",
        ));
    }

    if config.contact.is_empty() {
        result.add_warning(ValidationWarning::new(
            "no contact configured; the authority cannot send expiry notices",
        ));
    }

    result
}

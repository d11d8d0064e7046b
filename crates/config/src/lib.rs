//! Certmint configuration
//!
//! Loads the `acme { ... }` block from a KDL document into an immutable
//! [`AcmeConfig`]. Every field has a default, so a minimal file only needs
//! the domain and the terms-of-service decision:
//!
//! ```kdl
//! acme {
//!     enabled #true
//!     domain "example.org"
//!     accept-terms-of-service #true
//! }
//! ```
//!
//! Loading never validates implicitly; call [`AcmeConfig::validate`] before
//! handing the config to the issuer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

mod error;
mod kdl;
mod validate;

pub use error::ConfigError;
pub use validate::{
    validate_domain_name, ErrorCategory, ValidationError, ValidationResult, ValidationWarning,
};

/// Let's Encrypt production directory
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

// ============================================================================
// Top-level configuration
// ============================================================================

/// Configuration for one issuance run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Whether issuance runs at all
    pub enabled: bool,

    /// The single domain to issue a certificate for
    pub domain: String,

    /// Whether the operator pre-approved the authority's terms of service
    pub accept_terms_of_service: bool,

    /// Explicit ACME directory URL; overrides `staging` when set
    pub endpoint: Option<String>,

    /// Use the Let's Encrypt staging directory when no endpoint is given
    pub staging: bool,

    /// Contact URIs registered with a new account (e.g. `mailto:ops@example.org`)
    pub contact: Vec<String>,

    /// Address the challenge responder listens on
    pub challenge_listen: String,

    /// What the hosting process does when a run fails
    pub on_failure: FailurePolicy,

    /// Overall deadline for one run, in seconds
    pub run_timeout_secs: Option<u64>,

    /// Artifact file locations
    pub files: FilesConfig,

    /// Keystore export settings
    pub keystore: KeystoreConfig,

    /// Status polling policy
    pub polling: PollingConfig,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: String::new(),
            accept_terms_of_service: false,
            endpoint: None,
            staging: false,
            contact: Vec::new(),
            challenge_listen: default_challenge_listen(),
            on_failure: FailurePolicy::default(),
            run_timeout_secs: None,
            files: FilesConfig::default(),
            keystore: KeystoreConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl AcmeConfig {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_kdl(&content)?;

        info!(
            path = %path.display(),
            domain = %config.domain,
            enabled = config.enabled,
            "Loaded ACME configuration"
        );

        Ok(config)
    }

    /// Parse configuration from KDL source text
    pub fn from_kdl(source: &str) -> Result<Self, ConfigError> {
        let doc: ::kdl::KdlDocument = source.parse()?;
        let config = kdl::parse_document(&doc)?;
        debug!(directory = %config.directory_url(), "Parsed ACME configuration");
        Ok(config)
    }

    /// The ACME directory URL this configuration points at
    pub fn directory_url(&self) -> &str {
        match &self.endpoint {
            Some(endpoint) => endpoint,
            None if self.staging => LETSENCRYPT_STAGING,
            None => LETSENCRYPT_PRODUCTION,
        }
    }

    /// The overall run deadline, if configured
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

fn default_challenge_listen() -> String {
    "0.0.0.0:80".to_string()
}

// ============================================================================
// Sub-sections
// ============================================================================

/// Behavior of the hosting process after a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Exit with a non-zero status
    #[default]
    Abort,
    /// Log the failure and keep running
    Warn,
}

impl FailurePolicy {
    fn from_str_loose(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "abort" | "fail" => Some(Self::Abort),
            "warn" | "log" => Some(Self::Warn),
            _ => None,
        }
    }
}

/// Paths of the key material and issued artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Account key pair (PKCS#8 PEM)
    pub account_key: PathBuf,
    /// Domain key pair (PKCS#8 PEM)
    pub domain_key: PathBuf,
    /// Certificate signing request (PEM)
    pub domain_csr: PathBuf,
    /// Leaf certificate followed by its chain (PEM)
    pub domain_chain: PathBuf,
    /// Account URL bound to the account key (JSON)
    pub account_credentials: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            account_key: PathBuf::from("user.key"),
            domain_key: PathBuf::from("domain.key"),
            domain_csr: PathBuf::from("domain.csr"),
            domain_chain: PathBuf::from("domain-chain.crt"),
            account_credentials: PathBuf::from("account.json"),
        }
    }
}

/// Keystore export settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreConfig {
    /// Output PKCS#12 file
    pub path: PathBuf,
    /// Password protecting the keystore
    pub password: String,
    /// Export tool executable
    pub tool: String,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("keystore.p12"),
            password: "password".to_string(),
            tool: "openssl".to_string(),
        }
    }
}

impl std::fmt::Debug for KeystoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoreConfig")
            .field("path", &self.path)
            .field("password", &"<redacted>")
            .field("tool", &self.tool)
            .finish()
    }
}

/// Status polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between status checks
    pub interval_secs: u64,
    /// Status checks before giving up
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            max_attempts: 10,
        }
    }
}

impl PollingConfig {
    /// Interval as a `Duration`
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

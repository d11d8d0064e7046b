//! Certmint Issuer Library
//!
//! Obtains a domain-validated TLS certificate through the ACME HTTP-01
//! challenge and exports it as a PKCS#12 keystore.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certmint_config::AcmeConfig;
//! use certmint_issuer::acme::{
//!     ChallengeResponder, ChallengeStore, InstantAcmeClient, IssuanceOrchestrator, OpensslExporter,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Arc::new(AcmeConfig::from_file("certmint.kdl")?);
//! let store = ChallengeStore::new();
//! // Serve `ChallengeResponder::new(store.clone()).router()` on port 80, then:
//! let orchestrator = IssuanceOrchestrator::new(
//!     config.clone(),
//!     InstantAcmeClient::new(&config)?,
//!     OpensslExporter::new(config.keystore.tool.clone()),
//!     store,
//! );
//! let report = orchestrator.issue(&CancellationToken::new()).await?;
//! ```

pub mod acme;
pub mod logging;

pub use acme::{
    AcmeError, ChallengeResponder, ChallengeStore, ErrorKind, InstantAcmeClient, IssuanceFailure,
    IssuanceOrchestrator, IssuanceReport, IssuanceState, OpensslExporter,
};
pub use logging::{init_logging, LogFormat};

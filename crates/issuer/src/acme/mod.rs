//! ACME HTTP-01 certificate issuance
//!
//! Obtains a certificate for a single domain from Let's Encrypt or a
//! compatible CA and exports it as a PKCS#12 keystore.
//!
//! # Architecture
//!
//! - [`IssuanceOrchestrator`] - The issuance state machine
//! - [`ProtocolClient`] - Capability interface over the ACME protocol, with
//!   [`InstantAcmeClient`] as the `instant-acme` backed implementation
//! - [`ChallengeStore`] - Pending HTTP-01 challenges, expiring after 15 minutes
//! - [`ChallengeResponder`] - Serves `/.well-known/acme-challenge/<token>`
//! - [`KeyMaterialProvider`] - Loads or creates the account and domain keys
//! - [`CertificateStorage`] - Persists the CSR, chain, and account binding
//! - [`KeystoreExporter`] - Packages key and chain, via [`OpensslExporter`]
//!
//! # Challenge Flow
//!
//! 1. [`IssuanceOrchestrator`] binds the account and creates an order
//! 2. The authority returns one authorization with an HTTP-01 challenge
//! 3. [`ChallengeStore`] receives the token and key authorization
//! 4. The orchestrator tells the authority the challenge is ready
//! 5. The authority requests `/.well-known/acme-challenge/<token>`
//! 6. [`ChallengeResponder`] answers from the store
//! 7. Once the challenge is valid the orchestrator submits the CSR, waits for
//!    the order, downloads the chain, and hands it to the exporter

mod certificate;
mod challenge;
mod client;
mod error;
mod export;
mod keys;
mod orchestrator;
mod protocol;
mod responder;
mod storage;

pub use certificate::{BundleError, CertificateBundle};
pub use challenge::{ChallengeStore, CHALLENGE_TTL};
pub use client::InstantAcmeClient;
pub use error::{AcmeError, ErrorKind, IssuanceFailure, PollSubject, ProtocolError};
pub use export::{ExportRequest, KeystoreExporter, OpensslExporter};
pub use keys::{CertificateRequest, KeyMaterial, KeyMaterialProvider, KeyOrigin};
pub use orchestrator::{IssuanceOrchestrator, IssuanceReport, IssuanceState};
pub use protocol::{
    Authorization, BoundAccount, Challenge, ChallengeKind, ProtocolClient, Status,
};
pub use responder::{ChallengeResponder, ACME_CHALLENGE_PREFIX};
pub use storage::{CertificateStorage, StoredAccount};

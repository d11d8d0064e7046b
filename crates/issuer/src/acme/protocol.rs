//! ACME protocol abstraction
//!
//! The orchestrator drives issuance through [`ProtocolClient`] and only ever
//! sees the plain model types defined here. The production implementation
//! lives in [`super::client`]; tests substitute a scripted one.

use std::fmt;

use async_trait::async_trait;

use super::certificate::CertificateBundle;
use super::error::ProtocolError;
use super::keys::{KeyMaterial, KeyOrigin};

/// Status of an authorization, challenge, or order as far as issuance cares
///
/// Intermediate authority states (`ready`, `processing`) are all `Pending`:
/// the only question a poll asks is whether to keep waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Valid,
    Invalid,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
        })
    }
}

/// Challenge type identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Http01 => f.write_str("http-01"),
            ChallengeKind::Dns01 => f.write_str("dns-01"),
            ChallengeKind::TlsAlpn01 => f.write_str("tls-alpn-01"),
            ChallengeKind::Other(name) => f.write_str(name),
        }
    }
}

/// One way of proving control over a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    /// Challenge resource URL at the authority
    pub url: String,
    /// Token the authority will request
    pub token: String,
    /// Expected response body: `<token>.<account key thumbprint>`
    pub key_authorization: String,
    pub status: Status,
}

/// Proof of control over one domain, offered as a set of challenges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub domain: String,
    pub status: Status,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The first offered challenge of `kind`, if any
    pub fn find_challenge(&self, kind: &ChallengeKind) -> Option<&Challenge> {
        self.challenges.iter().find(|c| &c.kind == kind)
    }

    /// Comma-separated challenge types, for error messages
    pub fn offered_kinds(&self) -> String {
        if self.challenges.is_empty() {
            return "none".to_string();
        }
        self.challenges
            .iter()
            .map(|c| c.kind.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// An account handle together with the key it is actually bound to
#[derive(Debug)]
pub struct BoundAccount<A> {
    pub account: A,
    /// SubjectPublicKeyInfo DER of the key the authority knows this account by
    pub public_key_der: Vec<u8>,
    /// Account URL, when the authority reported one
    pub location: Option<String>,
}

/// Operations the orchestrator needs from an ACME authority
///
/// `Order` is mutable state owned by the run; every operation on an order
/// takes it by `&mut` so implementations may refresh it in place.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    type Account: Send + Sync;
    type Order: Send;

    /// Find the account for `account_key`, registering it if necessary.
    ///
    /// Must fail with [`ProtocolError::TermsNotAccepted`] before registering
    /// anything when the authority publishes terms of service and
    /// `terms_accepted` is false. A key with [`KeyOrigin::Existing`] must
    /// never be replaced on disk.
    async fn bind_or_create_account(
        &self,
        account_key: &KeyMaterial,
        origin: KeyOrigin,
        terms_accepted: bool,
    ) -> Result<BoundAccount<Self::Account>, ProtocolError>;

    /// Open a new order for exactly one DNS identifier
    async fn create_order(
        &self,
        account: &Self::Account,
        domain: &str,
    ) -> Result<Self::Order, ProtocolError>;

    /// Current authorizations of the order
    async fn authorizations(
        &self,
        order: &mut Self::Order,
    ) -> Result<Vec<Authorization>, ProtocolError>;

    /// Tell the authority the challenge response is being served
    async fn trigger_challenge(
        &self,
        order: &mut Self::Order,
        challenge: &Challenge,
    ) -> Result<(), ProtocolError>;

    /// Re-fetch the status of a triggered challenge
    async fn challenge_status(
        &self,
        order: &mut Self::Order,
        challenge: &Challenge,
    ) -> Result<Status, ProtocolError>;

    /// Submit the DER-encoded certificate signing request
    async fn submit_csr(
        &self,
        order: &mut Self::Order,
        csr_der: &[u8],
    ) -> Result<(), ProtocolError>;

    /// Re-fetch the order status
    async fn order_status(&self, order: &mut Self::Order) -> Result<Status, ProtocolError>;

    /// Download the issued certificate chain, if the authority has one
    async fn certificate(
        &self,
        order: &mut Self::Order,
    ) -> Result<Option<CertificateBundle>, ProtocolError>;
}

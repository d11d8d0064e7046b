//! Error types for certificate issuance

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use certmint_common::PollError;
use thiserror::Error;

use super::orchestrator::IssuanceState;
use super::protocol::ChallengeKind;

/// Coarse classification of an [`AcmeError`]
///
/// Callers (and tests) branch on this rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A local requirement was not met before talking to the authority
    Precondition,
    /// The authority rejected a request or could not be reached
    RemoteProtocol,
    /// The authorization offered no HTTP-01 challenge
    ChallengeNotFound,
    /// A challenge or order reached the `invalid` status
    InvalidStatus,
    /// A challenge or order did not become valid within the poll budget
    PollTimeout,
    /// Reading or writing local files failed
    Io,
    /// The keystore export tool failed
    ExternalTool,
    /// The run was cancelled
    Cancelled,
    /// The overall run deadline elapsed
    DeadlineExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::RemoteProtocol => "remote-protocol",
            ErrorKind::ChallengeNotFound => "challenge-not-found",
            ErrorKind::InvalidStatus => "invalid-status",
            ErrorKind::PollTimeout => "poll-timeout",
            ErrorKind::Io => "io",
            ErrorKind::ExternalTool => "external-tool",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
        };
        f.write_str(name)
    }
}

/// Which resource a status poll was watching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSubject {
    Authorization,
    Challenge,
    Order,
}

impl fmt::Display for PollSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollSubject::Authorization => "authorization",
            PollSubject::Challenge => "challenge",
            PollSubject::Order => "order",
        })
    }
}

/// Errors raised by a protocol client
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The authority requires terms-of-service agreement and it was not given
    #[error("the authority requires agreement to its terms of service{}", terms_suffix(.terms_of_service))]
    TermsNotAccepted { terms_of_service: Option<String> },

    /// The authority answered with an error document
    #[error("request rejected by the authority: {0}")]
    Rejected(String),

    /// The authority could not be reached or answered garbage
    #[error("transport error: {0}")]
    Transport(String),

    /// Local state the client keeps (account key, sidecar) could not be used
    #[error(transparent)]
    Local(Box<AcmeError>),
}

fn terms_suffix(terms: &Option<String>) -> String {
    terms
        .as_ref()
        .map(|url| format!(" ({})", url))
        .unwrap_or_default()
}

/// Errors raised while issuing a certificate
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("ACME protocol error: {0}")]
    RemoteProtocol(String),

    #[error("no {wanted} challenge offered for {domain} (offered: {offered})")]
    ChallengeNotFound {
        domain: String,
        wanted: ChallengeKind,
        offered: String,
    },

    #[error("{subject} became invalid{}", detail_suffix(.detail))]
    InvalidStatus {
        subject: PollSubject,
        detail: Option<String>,
    },

    #[error("{subject} not valid after {attempts} attempt(s)")]
    PollTimeout { subject: PollSubject, attempts: u32 },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid key material in {path:?}: {message}")]
    KeyMaterial { path: PathBuf, message: String },

    #[error("the authority returned no certificate for a valid order")]
    CertificateMissing,

    #[error("keystore export with '{tool}' failed{}: {output}", status_suffix(.status))]
    ExternalTool {
        tool: String,
        status: Option<i32>,
        output: String,
    },

    #[error("issuance cancelled")]
    Cancelled,

    #[error("issuance did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

fn status_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" with exit code {}", code),
        None => " to start".to_string(),
    }
}

impl AcmeError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcmeError::Precondition(_) => ErrorKind::Precondition,
            AcmeError::RemoteProtocol(_) => ErrorKind::RemoteProtocol,
            AcmeError::ChallengeNotFound { .. } => ErrorKind::ChallengeNotFound,
            AcmeError::InvalidStatus { .. } => ErrorKind::InvalidStatus,
            AcmeError::PollTimeout { .. } => ErrorKind::PollTimeout,
            AcmeError::Io { .. } | AcmeError::KeyMaterial { .. } | AcmeError::CertificateMissing => {
                ErrorKind::Io
            }
            AcmeError::ExternalTool { .. } => ErrorKind::ExternalTool,
            AcmeError::Cancelled => ErrorKind::Cancelled,
            AcmeError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AcmeError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<ProtocolError> for AcmeError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::TermsNotAccepted { .. } => AcmeError::Precondition(error.to_string()),
            ProtocolError::Rejected(message) | ProtocolError::Transport(message) => {
                AcmeError::RemoteProtocol(message)
            }
            ProtocolError::Local(error) => *error,
        }
    }
}

impl From<PollError> for AcmeError {
    fn from(error: PollError) -> Self {
        match error {
            PollError::Cancelled { .. } => AcmeError::Cancelled,
        }
    }
}

/// A failed issuance run
///
/// Carries the state the run had reached, so an operator can tell a run that
/// never got an account from one that timed out waiting for the certificate.
#[derive(Debug, Error)]
#[error("certificate issuance for {domain} failed after reaching {state}: {error}")]
pub struct IssuanceFailure {
    pub domain: String,
    pub state: IssuanceState,
    #[source]
    pub error: AcmeError,
}

impl IssuanceFailure {
    /// Classification of the underlying error
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

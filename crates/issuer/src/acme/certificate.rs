//! Issued certificate chains

use chrono::{DateTime, Utc};
use pem::Pem;
use thiserror::Error;
use x509_parser::parse_x509_certificate;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("no CERTIFICATE blocks found")]
    Empty,
}

/// A leaf certificate followed by zero or more intermediates
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateBundle {
    certificates: Vec<Pem>,
}

impl CertificateBundle {
    /// Parse a PEM chain as served by the authority.
    ///
    /// Non-certificate blocks are skipped; the first certificate is the leaf.
    pub fn from_pem(chain: &str) -> Result<Self, BundleError> {
        let certificates: Vec<Pem> = pem::parse_many(chain)?
            .into_iter()
            .filter(|block| block.tag() == CERTIFICATE_TAG)
            .collect();

        if certificates.is_empty() {
            return Err(BundleError::Empty);
        }
        Ok(Self { certificates })
    }

    pub fn to_pem(&self) -> String {
        pem::encode_many(&self.certificates)
    }

    pub fn leaf_der(&self) -> &[u8] {
        self.certificates[0].contents()
    }

    /// Number of certificates, leaf included
    // Never zero: `from_pem` rejects input without a certificate.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Expiry of the leaf, if it parses as X.509
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        let (_, leaf) = parse_x509_certificate(self.leaf_der()).ok()?;
        DateTime::from_timestamp(leaf.validity().not_after.timestamp(), 0)
    }
}

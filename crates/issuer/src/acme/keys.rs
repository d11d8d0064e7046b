//! Key material for the account and the domain
//!
//! Keys are ECDSA P-256 pairs stored as unencrypted PKCS#8 PEM. A key file is
//! created on first use and reused verbatim on every later run.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PublicKeyData};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::AcmeError;
use super::storage::{create_atomic, write_atomic, FileMode};

/// A key pair loaded from or destined for disk
pub struct KeyMaterial {
    key_pair: KeyPair,
}

impl KeyMaterial {
    /// Generate a fresh ECDSA P-256 key pair
    pub fn generate() -> Result<Self, rcgen::Error> {
        Ok(Self {
            key_pair: KeyPair::generate()?,
        })
    }

    /// Parse a PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, rcgen::Error> {
        Ok(Self {
            key_pair: KeyPair::from_pem(pem)?,
        })
    }

    /// Parse a PKCS#8 DER private key
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, rcgen::Error> {
        let pem = pem::encode(&pem::Pem::new("PRIVATE KEY", der.to_vec()));
        Self::from_pem(&pem)
    }

    pub fn to_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    pub fn pkcs8_der(&self) -> Vec<u8> {
        self.key_pair.serialize_der()
    }

    /// SubjectPublicKeyInfo DER of the public half
    pub fn public_key_der(&self) -> Vec<u8> {
        self.key_pair.subject_public_key_info()
    }

    /// Hex SHA-256 of the public key
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.public_key_der()))
    }

    /// Whether both pairs share the same public key
    pub fn same_key_as(&self, public_key_der: &[u8]) -> bool {
        self.public_key_der() == public_key_der
    }

    /// Build a certificate signing request for `domain`, signed by this key.
    ///
    /// The domain is both the subject common name and the only SAN entry.
    pub fn certificate_request(&self, domain: &str) -> Result<CertificateRequest, rcgen::Error> {
        let mut params = CertificateParams::new(vec![domain.to_string()])?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, domain);
        params.distinguished_name = name;

        let csr = params.serialize_request(&self.key_pair)?;
        Ok(CertificateRequest {
            der: csr.der().to_vec(),
            pem: csr.pem()?,
        })
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Whether a key file was found or had to be generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// The file was already on disk
    Existing,
    /// This process generated and wrote it
    Created,
}

/// A PKCS#10 request in both encodings
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub der: Vec<u8>,
    pub pem: String,
}

/// Loads key pairs from disk, generating and persisting them when absent
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMaterialProvider;

impl KeyMaterialProvider {
    pub fn new() -> Self {
        Self
    }

    /// Load the key at `path`, or create and persist a new one.
    ///
    /// A new key is written to a temporary file in the same directory and
    /// renamed into place without overwriting, so a concurrent creator that
    /// wins the race has its key loaded instead.
    pub fn load_or_create(&self, path: &Path) -> Result<KeyMaterial, AcmeError> {
        self.load_or_create_with_origin(path).map(|(key, _)| key)
    }

    /// Like [`load_or_create`](Self::load_or_create), also reporting whether
    /// this call created the file.
    pub fn load_or_create_with_origin(
        &self,
        path: &Path,
    ) -> Result<(KeyMaterial, KeyOrigin), AcmeError> {
        match fs::read_to_string(path) {
            Ok(pem) => {
                let key = parse_key(path, &pem)?;
                debug!(
                    path = %path.display(),
                    fingerprint = %short(&key.fingerprint()),
                    "Loaded existing key pair"
                );
                return Ok((key, KeyOrigin::Existing));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(AcmeError::io(path, e)),
        }

        let key = KeyMaterial::generate().map_err(|e| AcmeError::KeyMaterial {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if create_atomic(path, key.to_pem().as_bytes(), FileMode::Private)? {
            info!(
                path = %path.display(),
                fingerprint = %short(&key.fingerprint()),
                "Generated new key pair"
            );
            Ok((key, KeyOrigin::Created))
        } else {
            debug!(path = %path.display(), "Key pair created concurrently, loading it");
            let pem = fs::read_to_string(path).map_err(|e| AcmeError::io(path, e))?;
            Ok((parse_key(path, &pem)?, KeyOrigin::Existing))
        }
    }

    /// Replace the key at `path` with `key`.
    ///
    /// Only for keys this process created and that no account uses yet.
    pub fn store(&self, path: &Path, key: &KeyMaterial) -> Result<(), AcmeError> {
        write_atomic(path, key.to_pem().as_bytes(), FileMode::Private)?;
        info!(
            path = %path.display(),
            fingerprint = %short(&key.fingerprint()),
            "Stored key pair"
        );
        Ok(())
    }
}

fn parse_key(path: &Path, pem: &str) -> Result<KeyMaterial, AcmeError> {
    KeyMaterial::from_pem(pem).map_err(|e| AcmeError::KeyMaterial {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub(crate) fn short(fingerprint: &str) -> &str {
    fingerprint.get(..16).unwrap_or(fingerprint)
}

//! Artifact storage for ACME
//!
//! Persists the CSR, the issued chain, and the account binding sidecar at the
//! locations named in [`FilesConfig`]. Every write goes to a temporary file in
//! the destination directory first and is then renamed into place, so a crash
//! never leaves a truncated artifact behind.
//!
//! # Files
//!
//! ```text
//! user.key           # account key pair (written by KeyMaterialProvider)
//! domain.key         # domain key pair (written by KeyMaterialProvider)
//! account.json       # account URL bound to user.key
//! domain.csr         # last submitted CSR
//! domain-chain.crt   # leaf certificate followed by intermediates
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use certmint_config::FilesConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use super::certificate::CertificateBundle;
use super::error::AcmeError;

/// Permissions applied to a written file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileMode {
    /// Owner read/write only (0600 on Unix)
    Private,
    /// Whatever the process umask yields for a new file
    Public,
}

/// Atomically write `contents` to `path`, replacing any existing file
pub(crate) fn write_atomic(path: &Path, contents: &[u8], mode: FileMode) -> Result<(), AcmeError> {
    let staged = stage(path, contents, mode)?;
    staged
        .persist(path)
        .map_err(|e| AcmeError::io(path, e.error))?;
    trace!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

/// Atomically create `path` with `contents`.
///
/// Returns `Ok(false)` without touching the file if it already exists.
pub(crate) fn create_atomic(path: &Path, contents: &[u8], mode: FileMode) -> Result<bool, AcmeError> {
    let staged = stage(path, contents, mode)?;
    match staged.persist_noclobber(path) {
        Ok(_) => {
            trace!(path = %path.display(), bytes = contents.len(), "Created file");
            Ok(true)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(AcmeError::io(path, e.error)),
    }
}

fn stage(path: &Path, contents: &[u8], mode: FileMode) -> Result<NamedTempFile, AcmeError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| AcmeError::io(dir, e))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| AcmeError::io(dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let bits = match mode {
            FileMode::Private => 0o600,
            FileMode::Public => 0o644,
        };
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(bits))
            .map_err(|e| AcmeError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    staged
        .write_all(contents)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| AcmeError::io(path, e))?;

    Ok(staged)
}

/// Account binding recorded next to the account key
///
/// Lets a later run resume the same account without re-registering. The
/// fingerprint ties the record to one key; a record for a different key or
/// directory is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    /// Account URL at the authority
    pub account_url: String,
    /// Directory URL the account was registered with
    pub directory: String,
    /// SHA-256 fingerprint of the account public key
    pub key_fingerprint: String,
    /// Contact URIs registered with the account
    #[serde(default)]
    pub contact: Vec<String>,
    /// When the account was created
    pub created: DateTime<Utc>,
}

/// Artifact storage
#[derive(Debug, Clone)]
pub struct CertificateStorage {
    files: FilesConfig,
}

impl CertificateStorage {
    /// Create storage over the configured file locations.
    ///
    /// Nothing is touched on disk until the first write.
    pub fn new(files: FilesConfig) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &FilesConfig {
        &self.files
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Load the account binding, if one was recorded
    pub fn load_account(&self) -> Result<Option<StoredAccount>, AcmeError> {
        let path = &self.files.account_credentials;

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "No stored ACME account found");
                return Ok(None);
            }
            Err(e) => return Err(AcmeError::io(path, e)),
        };

        let account: StoredAccount =
            serde_json::from_str(&content).map_err(|e| AcmeError::io(path, e.into()))?;

        debug!(
            account_url = %account.account_url,
            created = %account.created,
            "Loaded ACME account binding"
        );
        Ok(Some(account))
    }

    /// Record the account binding
    pub fn save_account(&self, account: &StoredAccount) -> Result<(), AcmeError> {
        let path = &self.files.account_credentials;
        let content =
            serde_json::to_string_pretty(account).map_err(|e| AcmeError::io(path, e.into()))?;
        write_atomic(path, content.as_bytes(), FileMode::Private)?;

        info!(account_url = %account.account_url, "Saved ACME account binding");
        Ok(())
    }

    // =========================================================================
    // Certificate Operations
    // =========================================================================

    /// Write the CSR in PEM form
    pub fn save_csr(&self, pem: &str) -> Result<PathBuf, AcmeError> {
        let path = &self.files.domain_csr;
        write_atomic(path, pem.as_bytes(), FileMode::Public)?;
        debug!(path = %path.display(), "Saved certificate signing request");
        Ok(path.clone())
    }

    /// Write the certificate chain, leaf first
    pub fn save_chain(&self, bundle: &CertificateBundle) -> Result<PathBuf, AcmeError> {
        let path = &self.files.domain_chain;
        write_atomic(path, bundle.to_pem().as_bytes(), FileMode::Public)?;

        info!(
            path = %path.display(),
            certificates = bundle.len(),
            expires = ?bundle.not_after(),
            "Saved certificate chain"
        );
        Ok(path.clone())
    }

    /// Load the previously issued chain, if any
    pub fn load_chain(&self) -> Result<Option<CertificateBundle>, AcmeError> {
        let path = &self.files.domain_chain;

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "No stored certificate chain found");
                return Ok(None);
            }
            Err(e) => return Err(AcmeError::io(path, e)),
        };

        CertificateBundle::from_pem(&content)
            .map(Some)
            .map_err(|e| AcmeError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

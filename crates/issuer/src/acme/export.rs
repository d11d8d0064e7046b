//! Keystore export
//!
//! Packages the domain key and the issued chain into a password-protected
//! PKCS#12 keystore by running an external tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::AcmeError;

/// Inputs and output of one export
#[derive(Clone)]
pub struct ExportRequest<'a> {
    pub key_path: &'a Path,
    pub chain_path: &'a Path,
    pub keystore_path: &'a Path,
    pub password: &'a str,
}

impl std::fmt::Debug for ExportRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRequest")
            .field("key_path", &self.key_path)
            .field("chain_path", &self.chain_path)
            .field("keystore_path", &self.keystore_path)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces a keystore from a key file and a chain file
#[async_trait]
pub trait KeystoreExporter: Send + Sync {
    /// Write the keystore described by `request`.
    ///
    /// A tool that runs but fails must surface as [`AcmeError::ExternalTool`].
    async fn export(&self, request: &ExportRequest<'_>) -> Result<PathBuf, AcmeError>;
}

/// Runs `openssl pkcs12 -export`
#[derive(Debug, Clone)]
pub struct OpensslExporter {
    tool: String,
}

impl OpensslExporter {
    /// Use the given executable (name on `PATH` or absolute path)
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

impl Default for OpensslExporter {
    fn default() -> Self {
        Self::new("openssl")
    }
}

#[async_trait]
impl KeystoreExporter for OpensslExporter {
    async fn export(&self, request: &ExportRequest<'_>) -> Result<PathBuf, AcmeError> {
        debug!(tool = %self.tool, ?request, "Exporting PKCS#12 keystore");

        let output = Command::new(&self.tool)
            .arg("pkcs12")
            .arg("-export")
            .arg("-out")
            .arg(request.keystore_path)
            .arg("-inkey")
            .arg(request.key_path)
            .arg("-in")
            .arg(request.chain_path)
            .arg("-password")
            .arg(format!("pass:{}", request.password))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AcmeError::ExternalTool {
                tool: self.tool.clone(),
                status: None,
                output: e.to_string(),
            })?;

        // stdout and stderr are reported together, stderr last.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        debug!(
            tool = %self.tool,
            exit_code = ?output.status.code(),
            output = %combined,
            "Keystore tool finished"
        );

        if !output.status.success() {
            warn!(
                tool = %self.tool,
                exit_code = ?output.status.code(),
                "Keystore export failed"
            );
            return Err(AcmeError::ExternalTool {
                tool: self.tool.clone(),
                status: output.status.code(),
                output: combined,
            });
        }

        info!(keystore = %request.keystore_path.display(), "Exported PKCS#12 keystore");
        Ok(request.keystore_path.to_path_buf())
    }
}

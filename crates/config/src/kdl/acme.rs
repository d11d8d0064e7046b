//! `acme` block KDL parsing.

use std::path::PathBuf;

use ::kdl::KdlNode;
use tracing::trace;

use super::helpers::{child, get_bool_entry, get_string_entry, get_string_list, get_u64_entry};
use crate::{AcmeConfig, ConfigError, FailurePolicy, FilesConfig, KeystoreConfig, PollingConfig};

/// Parse the `acme` block
pub fn parse_acme_config(node: &KdlNode) -> Result<AcmeConfig, ConfigError> {
    trace!("Parsing acme configuration block");

    let defaults = AcmeConfig::default();

    let on_failure = match get_string_entry(node, "on-failure")? {
        Some(value) => FailurePolicy::from_str_loose(&value).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid on-failure policy '{}'. Valid policies: abort, warn",
                value
            ))
        })?,
        None => defaults.on_failure,
    };

    let config = AcmeConfig {
        enabled: get_bool_entry(node, "enabled")?.unwrap_or(defaults.enabled),
        domain: get_string_entry(node, "domain")?.unwrap_or_default(),
        accept_terms_of_service: get_bool_entry(node, "accept-terms-of-service")?
            .unwrap_or(defaults.accept_terms_of_service),
        endpoint: get_string_entry(node, "endpoint")?,
        staging: get_bool_entry(node, "staging")?.unwrap_or(defaults.staging),
        contact: get_string_list(node, "contact")?,
        challenge_listen: get_string_entry(node, "challenge-listen")?
            .unwrap_or(defaults.challenge_listen),
        on_failure,
        run_timeout_secs: get_u64_entry(node, "run-timeout-secs")?,
        files: match child(node, "files") {
            Some(files) => parse_files(files)?,
            None => defaults.files,
        },
        keystore: match child(node, "keystore") {
            Some(keystore) => parse_keystore(keystore)?,
            None => defaults.keystore,
        },
        polling: match child(node, "polling") {
            Some(polling) => parse_polling(polling)?,
            None => defaults.polling,
        },
    };

    trace!(
        domain = %config.domain,
        enabled = config.enabled,
        staging = config.staging,
        on_failure = ?config.on_failure,
        "Parsed acme configuration"
    );

    Ok(config)
}

fn parse_files(node: &KdlNode) -> Result<FilesConfig, ConfigError> {
    let defaults = FilesConfig::default();
    let path = |name: &str, default: PathBuf| -> Result<PathBuf, ConfigError> {
        Ok(get_string_entry(node, name)?.map(PathBuf::from).unwrap_or(default))
    };

    Ok(FilesConfig {
        account_key: path("account-key", defaults.account_key)?,
        domain_key: path("domain-key", defaults.domain_key)?,
        domain_csr: path("domain-csr", defaults.domain_csr)?,
        domain_chain: path("domain-chain", defaults.domain_chain)?,
        account_credentials: path("account-credentials", defaults.account_credentials)?,
    })
}

fn parse_keystore(node: &KdlNode) -> Result<KeystoreConfig, ConfigError> {
    let defaults = KeystoreConfig::default();

    Ok(KeystoreConfig {
        path: get_string_entry(node, "path")?
            .map(PathBuf::from)
            .unwrap_or(defaults.path),
        password: get_string_entry(node, "password")?.unwrap_or(defaults.password),
        tool: get_string_entry(node, "tool")?.unwrap_or(defaults.tool),
    })
}

fn parse_polling(node: &KdlNode) -> Result<PollingConfig, ConfigError> {
    let defaults = PollingConfig::default();

    let max_attempts = match get_u64_entry(node, "max-attempts")? {
        Some(v) => u32::try_from(v).map_err(|_| {
            ConfigError::Invalid(format!("'max-attempts' is too large: {}", v))
        })?,
        None => defaults.max_attempts,
    };

    Ok(PollingConfig {
        interval_secs: get_u64_entry(node, "interval-secs")?.unwrap_or(defaults.interval_secs),
        max_attempts,
    })
}

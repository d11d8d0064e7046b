//! `instant-acme` backed protocol client
//!
//! Binds the account key to an ACME account and maps the library's order,
//! authorization, and challenge resources onto the plain model in
//! [`super::protocol`].
//!
//! `instant-acme` generates the key for a newly registered account itself and
//! cannot register a caller-supplied one. An account key file created by this
//! run has never been registered, so on first registration the client adopts
//! the generated key: it replaces that fresh file and records the account URL
//! in the credentials sidecar. Later runs find the sidecar, check it belongs to
//! the key on disk, and resume the account from the pair. A key that was
//! already on disk without a matching sidecar is refused and left untouched.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use certmint_config::AcmeConfig;
use chrono::Utc;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::certificate::CertificateBundle;
use super::error::{AcmeError, ProtocolError};
use super::keys::{short, KeyMaterial, KeyMaterialProvider, KeyOrigin};
use super::protocol::{Authorization, BoundAccount, Challenge, ChallengeKind, ProtocolClient, Status};
use super::storage::{CertificateStorage, StoredAccount};

/// Timeout for the plain HTTP directory fetch
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(30);

/// Production [`ProtocolClient`] talking to a real ACME directory
pub struct InstantAcmeClient {
    directory_url: String,
    contact: Vec<String>,
    account_key_path: PathBuf,
    storage: CertificateStorage,
    keys: KeyMaterialProvider,
    http: reqwest::Client,
}

impl InstantAcmeClient {
    /// Create a client for the directory and files named in `config`
    pub fn new(config: &AcmeConfig) -> Result<Self, AcmeError> {
        let http = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .user_agent(concat!("certmint/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AcmeError::RemoteProtocol(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            directory_url: config.directory_url().to_string(),
            contact: config.contact.clone(),
            account_key_path: config.files.account_key.clone(),
            storage: CertificateStorage::new(config.files.clone()),
            keys: KeyMaterialProvider::new(),
            http,
        })
    }

    /// Terms-of-service URL published in the directory metadata, if any
    async fn terms_of_service(&self) -> Result<Option<String>, ProtocolError> {
        let directory: Value = self
            .http
            .get(&self.directory_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ProtocolError::Transport(format!("fetching directory: {}", e)))?
            .json()
            .await
            .map_err(|e| ProtocolError::Transport(format!("parsing directory: {}", e)))?;

        Ok(terms_of_service_in(&directory))
    }

    /// Explain why the configured account key cannot be bound
    fn refusal(&self, reason: Refusal) -> ProtocolError {
        let key = self.account_key_path.display();
        let sidecar = self.storage.files().account_credentials.display();
        let message = match reason {
            Refusal::Unrecorded => format!(
                "account key {} already exists but {} records no account for it; restore the \
                 credentials file, or move the key aside to register a new account",
                key, sidecar
            ),
            Refusal::OtherKey => format!(
                "{} records an account for a different key than {}; restore the matching key, \
                 or move both files aside to register a new account",
                sidecar, key
            ),
            Refusal::OtherDirectory { recorded } => format!(
                "account key {} is registered with {}, not {}; point the configuration back at \
                 that directory, or move the key aside to register a new account",
                key, recorded, self.directory_url
            ),
        };
        local(AcmeError::Precondition(message))
    }

    async fn resume(
        &self,
        stored: StoredAccount,
        key: &KeyMaterial,
    ) -> Result<BoundAccount<Account>, ProtocolError> {
        let credentials: AccountCredentials = serde_json::from_value(json!({
            "id": stored.account_url,
            "key_pkcs8": URL_SAFE_NO_PAD.encode(key.pkcs8_der()),
            "directory": self.directory_url,
        }))
        .map_err(|e| ProtocolError::Transport(format!("building account credentials: {}", e)))?;

        let account = Account::from_credentials(credentials)
            .await
            .map_err(protocol_error)?;

        info!(account_url = %stored.account_url, "Resumed existing ACME account");
        Ok(BoundAccount {
            account,
            public_key_der: key.public_key_der(),
            location: Some(stored.account_url),
        })
    }

    /// Register a new account and adopt its key in place of the fresh key file
    async fn register(&self, terms_accepted: bool) -> Result<BoundAccount<Account>, ProtocolError> {
        let contact: Vec<&str> = self.contact.iter().map(String::as_str).collect();

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: terms_accepted,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(protocol_error)?;

        let (account_url, registered_key) = adopt(&credentials)?;
        self.keys
            .store(&self.account_key_path, &registered_key)
            .map_err(local)?;
        self.storage
            .save_account(&StoredAccount {
                account_url: account_url.clone(),
                directory: self.directory_url.clone(),
                key_fingerprint: registered_key.fingerprint(),
                contact: self.contact.clone(),
                created: Utc::now(),
            })
            .map_err(local)?;

        info!(
            account_url = %account_url,
            fingerprint = %short(&registered_key.fingerprint()),
            "Registered new ACME account"
        );
        Ok(BoundAccount {
            account,
            public_key_der: registered_key.public_key_der(),
            location: Some(account_url),
        })
    }
}

impl std::fmt::Debug for InstantAcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeClient")
            .field("directory_url", &self.directory_url)
            .field("contact", &self.contact)
            .field("account_key_path", &self.account_key_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProtocolClient for InstantAcmeClient {
    type Account = Account;
    type Order = Order;

    async fn bind_or_create_account(
        &self,
        account_key: &KeyMaterial,
        origin: KeyOrigin,
        terms_accepted: bool,
    ) -> Result<BoundAccount<Account>, ProtocolError> {
        let stored = self.storage.load_account().map_err(local)?;
        let binding = choose_binding(
            stored,
            &account_key.fingerprint(),
            origin,
            &self.directory_url,
        );

        match binding {
            Binding::Resume(stored) => {
                check_terms(self.terms_of_service().await?, terms_accepted)?;
                self.resume(stored, account_key).await
            }
            Binding::Register => {
                check_terms(self.terms_of_service().await?, terms_accepted)?;
                self.register(terms_accepted).await
            }
            // Decided before any request, so a refused key never reaches the authority
            Binding::Refuse(reason) => Err(self.refusal(reason)),
        }
    }

    async fn create_order(&self, account: &Account, domain: &str) -> Result<Order, ProtocolError> {
        let identifiers = [Identifier::Dns(domain.to_string())];
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(protocol_error)?;

        debug!(domain = %domain, "Created ACME order");
        Ok(order)
    }

    async fn authorizations(&self, order: &mut Order) -> Result<Vec<Authorization>, ProtocolError> {
        let authorizations = order.authorizations().await.map_err(protocol_error)?;

        Ok(authorizations
            .into_iter()
            .map(|authz| {
                // An authorization turns valid once one of its challenges
                // does, and invalid once one fails.
                let status = authorization_status(&authz.status);
                let challenges = authz
                    .challenges
                    .iter()
                    .map(|challenge| Challenge {
                        kind: challenge_kind(&challenge.r#type),
                        url: challenge.url.clone(),
                        token: challenge.token.clone(),
                        key_authorization: order.key_authorization(challenge).as_str().to_string(),
                        status,
                    })
                    .collect();

                Authorization {
                    domain: identifier_name(&authz.identifier),
                    status,
                    challenges,
                }
            })
            .collect())
    }

    async fn trigger_challenge(
        &self,
        order: &mut Order,
        challenge: &Challenge,
    ) -> Result<(), ProtocolError> {
        order
            .set_challenge_ready(&challenge.url)
            .await
            .map_err(protocol_error)
    }

    async fn challenge_status(
        &self,
        order: &mut Order,
        challenge: &Challenge,
    ) -> Result<Status, ProtocolError> {
        let authorizations = order.authorizations().await.map_err(protocol_error)?;

        authorizations
            .iter()
            .find(|authz| authz.challenges.iter().any(|c| c.url == challenge.url))
            .map(|authz| authorization_status(&authz.status))
            .ok_or_else(|| {
                ProtocolError::Rejected(format!(
                    "challenge {} is no longer part of the order",
                    challenge.url
                ))
            })
    }

    async fn submit_csr(&self, order: &mut Order, csr_der: &[u8]) -> Result<(), ProtocolError> {
        order.finalize(csr_der).await.map_err(protocol_error)
    }

    async fn order_status(&self, order: &mut Order) -> Result<Status, ProtocolError> {
        let state = order.refresh().await.map_err(protocol_error)?;
        Ok(order_status(&state.status))
    }

    async fn certificate(
        &self,
        order: &mut Order,
    ) -> Result<Option<CertificateBundle>, ProtocolError> {
        let Some(chain) = order.certificate().await.map_err(protocol_error)? else {
            return Ok(None);
        };

        CertificateBundle::from_pem(&chain)
            .map(Some)
            .map_err(|e| ProtocolError::Rejected(format!("unusable certificate chain: {}", e)))
    }
}

/// Extract the account URL and the registered key from fresh credentials
fn adopt(credentials: &AccountCredentials) -> Result<(String, KeyMaterial), ProtocolError> {
    let value = serde_json::to_value(credentials)
        .map_err(|e| ProtocolError::Transport(format!("reading account credentials: {}", e)))?;

    let account_url = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Transport("account credentials carry no id".to_string()))?
        .to_string();

    let encoded = value
        .get("key_pkcs8")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Transport("account credentials carry no key".to_string()))?;

    let der = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| ProtocolError::Transport(format!("decoding account key: {}", e)))?;

    let key = KeyMaterial::from_pkcs8_der(&der)
        .map_err(|e| ProtocolError::Transport(format!("parsing account key: {}", e)))?;

    Ok((account_url, key))
}

/// How the configured account key gets bound to an account
#[derive(Debug, PartialEq, Eq)]
enum Binding {
    /// The sidecar records the account this key belongs to
    Resume(StoredAccount),
    /// The key file was created by this run and may be replaced
    Register,
    Refuse(Refusal),
}

#[derive(Debug, PartialEq, Eq)]
enum Refusal {
    /// An existing key with no recorded account
    Unrecorded,
    /// The recorded account belongs to another key
    OtherKey,
    /// The key's account lives at another directory
    OtherDirectory { recorded: String },
}

fn choose_binding(
    stored: Option<StoredAccount>,
    fingerprint: &str,
    origin: KeyOrigin,
    directory: &str,
) -> Binding {
    match stored {
        Some(stored) if stored.key_fingerprint == fingerprint && stored.directory == directory => {
            Binding::Resume(stored)
        }
        Some(stored) => {
            if origin == KeyOrigin::Created {
                warn!(
                    account_url = %stored.account_url,
                    "Stored ACME account belongs to a key that no longer exists, registering anew"
                );
                Binding::Register
            } else if stored.key_fingerprint == fingerprint {
                Binding::Refuse(Refusal::OtherDirectory {
                    recorded: stored.directory,
                })
            } else {
                Binding::Refuse(Refusal::OtherKey)
            }
        }
        None => match origin {
            KeyOrigin::Created => Binding::Register,
            KeyOrigin::Existing => Binding::Refuse(Refusal::Unrecorded),
        },
    }
}

/// Terms-of-service URL from a directory document
fn terms_of_service_in(directory: &Value) -> Option<String> {
    directory
        .pointer("/meta/termsOfService")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn check_terms(terms: Option<String>, accepted: bool) -> Result<(), ProtocolError> {
    match terms {
        Some(url) if !accepted => Err(ProtocolError::TermsNotAccepted {
            terms_of_service: Some(url),
        }),
        Some(url) => {
            debug!(terms_of_service = %url, "Terms of service accepted by configuration");
            Ok(())
        }
        None => Ok(()),
    }
}

fn protocol_error(error: instant_acme::Error) -> ProtocolError {
    match error {
        instant_acme::Error::Api(problem) => ProtocolError::Rejected(problem.to_string()),
        other => ProtocolError::Transport(other.to_string()),
    }
}

fn local(error: AcmeError) -> ProtocolError {
    ProtocolError::Local(Box::new(error))
}

fn identifier_name(identifier: &Identifier) -> String {
    #[allow(unreachable_patterns)]
    match identifier {
        Identifier::Dns(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

fn challenge_kind(kind: &ChallengeType) -> ChallengeKind {
    #[allow(unreachable_patterns)]
    match kind {
        ChallengeType::Http01 => ChallengeKind::Http01,
        ChallengeType::Dns01 => ChallengeKind::Dns01,
        ChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
        other => ChallengeKind::Other(format!("{:?}", other)),
    }
}

fn authorization_status(status: &AuthorizationStatus) -> Status {
    match status {
        AuthorizationStatus::Valid => Status::Valid,
        AuthorizationStatus::Pending => Status::Pending,
        _ => Status::Invalid,
    }
}

fn order_status(status: &OrderStatus) -> Status {
    match status {
        OrderStatus::Valid => Status::Valid,
        OrderStatus::Invalid => Status::Invalid,
        _ => Status::Pending,
    }
}

//! Scripted ACME authority and recording exporter for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use certmint_config::AcmeConfig;
use certmint_issuer::acme::{
    AcmeError, Authorization, BoundAccount, CertificateBundle, Challenge, ChallengeKind,
    ChallengeStore, ExportRequest, KeyMaterial, KeyOrigin, KeystoreExporter, ProtocolClient,
    ProtocolError, Status,
};
use rcgen::{CertificateParams, KeyPair};
use tokio::time::Instant;

pub const DOMAIN: &str = "example.org";
pub const TOKEN: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
pub const TERMS: &str = "https://acme.test/terms.pdf";

/// Everything the authority saw
#[derive(Debug, Default)]
pub struct AuthorityLog {
    pub accounts_bound: u32,
    pub account_public_key: Option<Vec<u8>>,
    pub account_key_origins: Vec<KeyOrigin>,
    pub orders_created: u32,
    pub triggers: u32,
    pub published_at_trigger: Option<bool>,
    pub triggered_at: Option<Instant>,
    pub challenge_polls: Vec<Instant>,
    pub order_polls: Vec<Instant>,
    pub csr: Option<Vec<u8>>,
    pub certificate_fetches: u32,
}

/// A deterministic stand-in for an ACME CA
pub struct ScriptedAuthority {
    terms_required: bool,
    authorization_status: Status,
    offered: Vec<ChallengeKind>,
    challenge_status: Status,
    challenge_script: Mutex<VecDeque<Status>>,
    order_script: Mutex<VecDeque<Status>>,
    certificate: Option<String>,
    observed_store: Option<ChallengeStore>,
    log: Arc<Mutex<AuthorityLog>>,
}

impl ScriptedAuthority {
    /// An authority that validates everything on the first poll
    pub fn new() -> Self {
        Self {
            terms_required: false,
            authorization_status: Status::Pending,
            offered: vec![ChallengeKind::Http01],
            challenge_status: Status::Pending,
            challenge_script: Mutex::new(VecDeque::from([Status::Valid])),
            order_script: Mutex::new(VecDeque::from([Status::Valid])),
            certificate: Some(chain_for(DOMAIN)),
            observed_store: None,
            log: Arc::new(Mutex::new(AuthorityLog::default())),
        }
    }

    pub fn requiring_terms(mut self) -> Self {
        self.terms_required = true;
        self
    }

    pub fn with_authorization_status(mut self, status: Status) -> Self {
        self.authorization_status = status;
        self
    }

    pub fn with_initial_challenge_status(mut self, status: Status) -> Self {
        self.challenge_status = status;
        self
    }

    pub fn offering(mut self, kinds: Vec<ChallengeKind>) -> Self {
        self.offered = kinds;
        self
    }

    /// Statuses returned by successive challenge polls; the last one repeats
    pub fn with_challenge_statuses(self, statuses: Vec<Status>) -> Self {
        *self.challenge_script.lock().unwrap() = statuses.into();
        self
    }

    /// Statuses returned by successive order polls; the last one repeats
    pub fn with_order_statuses(self, statuses: Vec<Status>) -> Self {
        *self.order_script.lock().unwrap() = statuses.into();
        self
    }

    pub fn without_certificate(mut self) -> Self {
        self.certificate = None;
        self
    }

    /// Record whether the token is answerable from `store` when triggered
    pub fn observing(mut self, store: ChallengeStore) -> Self {
        self.observed_store = Some(store);
        self
    }

    pub fn log(&self) -> Arc<Mutex<AuthorityLog>> {
        Arc::clone(&self.log)
    }

    fn next(script: &Mutex<VecDeque<Status>>) -> Status {
        let mut script = script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            *script.front().unwrap()
        }
    }
}

#[async_trait]
impl ProtocolClient for ScriptedAuthority {
    type Account = ();
    type Order = ();

    async fn bind_or_create_account(
        &self,
        account_key: &KeyMaterial,
        origin: KeyOrigin,
        terms_accepted: bool,
    ) -> Result<BoundAccount<()>, ProtocolError> {
        if self.terms_required && !terms_accepted {
            return Err(ProtocolError::TermsNotAccepted {
                terms_of_service: Some(TERMS.to_string()),
            });
        }

        let mut log = self.log.lock().unwrap();
        log.accounts_bound += 1;
        log.account_public_key = Some(account_key.public_key_der());
        log.account_key_origins.push(origin);

        Ok(BoundAccount {
            account: (),
            public_key_der: account_key.public_key_der(),
            location: Some("https://acme.test/acct/1".to_string()),
        })
    }

    async fn create_order(&self, _account: &(), domain: &str) -> Result<(), ProtocolError> {
        assert_eq!(domain, DOMAIN);
        self.log.lock().unwrap().orders_created += 1;
        Ok(())
    }

    async fn authorizations(&self, _order: &mut ()) -> Result<Vec<Authorization>, ProtocolError> {
        let challenges = self
            .offered
            .iter()
            .enumerate()
            .map(|(i, kind)| Challenge {
                kind: kind.clone(),
                url: format!("https://acme.test/chall/{}", i),
                token: if *kind == ChallengeKind::Http01 {
                    TOKEN.to_string()
                } else {
                    format!("other-{}", i)
                },
                key_authorization: format!("{}.thumbprint", TOKEN),
                status: self.challenge_status,
            })
            .collect();

        Ok(vec![Authorization {
            domain: DOMAIN.to_string(),
            status: self.authorization_status,
            challenges,
        }])
    }

    async fn trigger_challenge(
        &self,
        _order: &mut (),
        challenge: &Challenge,
    ) -> Result<(), ProtocolError> {
        let published = self
            .observed_store
            .as_ref()
            .map(|store| store.get(&challenge.token).as_deref() == Some(&challenge.key_authorization[..]));

        let mut log = self.log.lock().unwrap();
        log.triggers += 1;
        log.published_at_trigger = published;
        log.triggered_at = Some(Instant::now());
        Ok(())
    }

    async fn challenge_status(
        &self,
        _order: &mut (),
        _challenge: &Challenge,
    ) -> Result<Status, ProtocolError> {
        self.log.lock().unwrap().challenge_polls.push(Instant::now());
        Ok(Self::next(&self.challenge_script))
    }

    async fn submit_csr(&self, _order: &mut (), csr_der: &[u8]) -> Result<(), ProtocolError> {
        self.log.lock().unwrap().csr = Some(csr_der.to_vec());
        Ok(())
    }

    async fn order_status(&self, _order: &mut ()) -> Result<Status, ProtocolError> {
        self.log.lock().unwrap().order_polls.push(Instant::now());
        Ok(Self::next(&self.order_script))
    }

    async fn certificate(
        &self,
        _order: &mut (),
    ) -> Result<Option<CertificateBundle>, ProtocolError> {
        self.log.lock().unwrap().certificate_fetches += 1;
        Ok(self
            .certificate
            .as_deref()
            .map(|pem| CertificateBundle::from_pem(pem).unwrap()))
    }
}

/// One recorded export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportCall {
    pub key_path: PathBuf,
    pub chain_path: PathBuf,
    pub keystore_path: PathBuf,
    pub password: String,
}

/// Exporter that records its calls instead of running a tool
#[derive(Clone, Default)]
pub struct RecordingExporter {
    fail: bool,
    calls: Arc<Mutex<Vec<ExportCall>>>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// An exporter whose tool exits with status 1
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ExportCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeystoreExporter for RecordingExporter {
    async fn export(&self, request: &ExportRequest<'_>) -> Result<PathBuf, AcmeError> {
        self.calls.lock().unwrap().push(ExportCall {
            key_path: request.key_path.to_path_buf(),
            chain_path: request.chain_path.to_path_buf(),
            keystore_path: request.keystore_path.to_path_buf(),
            password: request.password.to_string(),
        });

        if self.fail {
            return Err(AcmeError::ExternalTool {
                tool: "openssl".to_string(),
                status: Some(1),
                output: "unable to load private key".to_string(),
            });
        }
        Ok(request.keystore_path.to_path_buf())
    }
}

/// An enabled configuration with every file under `dir`
pub fn config_in(dir: &Path) -> AcmeConfig {
    let mut config = AcmeConfig {
        enabled: true,
        domain: DOMAIN.to_string(),
        accept_terms_of_service: true,
        ..Default::default()
    };
    config.files.account_key = dir.join("user.key");
    config.files.domain_key = dir.join("domain.key");
    config.files.domain_csr = dir.join("domain.csr");
    config.files.domain_chain = dir.join("domain-chain.crt");
    config.files.account_credentials = dir.join("account.json");
    config.keystore.path = dir.join("keystore.p12");
    config.keystore.password = "changeit".to_string();
    config
}

/// A PEM leaf for `domain` plus one self-signed "intermediate"
pub fn chain_for(domain: &str) -> String {
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = CertificateParams::new(vec![domain.to_string()])
        .unwrap()
        .self_signed(&leaf_key)
        .unwrap();

    let ca_key = KeyPair::generate().unwrap();
    let ca = CertificateParams::new(vec!["Test Intermediate".to_string()])
        .unwrap()
        .self_signed(&ca_key)
        .unwrap();

    format!("{}{}", leaf.pem(), ca.pem())
}

/// Offsets of `instants` from `origin`, in whole seconds
pub fn offsets_secs(origin: Instant, instants: &[Instant]) -> Vec<u64> {
    instants
        .iter()
        .map(|at| at.duration_since(origin).as_secs())
        .collect()
}

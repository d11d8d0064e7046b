//! Certificate issuance state machine
//!
//! One run takes a single domain from "no certificate" to an exported
//! keystore:
//!
//! ```text
//! Start -> AccountReady -> OrderCreated -> AuthorizationsPending
//!       -> ChallengeTriggered -> AuthorizationValid -> CsrSubmitted
//!       -> OrderValid -> CertificateRetrieved -> Exported
//! ```
//!
//! Any error before `Exported` ends the run with an [`IssuanceFailure`]
//! recording the last state reached. Nothing is persisted between runs; a
//! re-run resumes only through the statuses the authority reports, so an
//! authorization or challenge that is already valid is never triggered again.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use certmint_common::{PollPolicy, Poller};
use certmint_config::{validate_domain_name, AcmeConfig};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::certificate::CertificateBundle;
use super::challenge::ChallengeStore;
use super::error::{AcmeError, IssuanceFailure, PollSubject};
use super::export::{ExportRequest, KeystoreExporter};
use super::keys::{short, KeyMaterialProvider};
use super::protocol::{Authorization, Challenge, ChallengeKind, ProtocolClient, Status};
use super::storage::CertificateStorage;

/// Progress of an issuance run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuanceState {
    Start,
    AccountReady,
    OrderCreated,
    AuthorizationsPending,
    ChallengeTriggered,
    AuthorizationValid,
    CsrSubmitted,
    OrderValid,
    CertificateRetrieved,
    Exported,
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssuanceState::Start => "start",
            IssuanceState::AccountReady => "account-ready",
            IssuanceState::OrderCreated => "order-created",
            IssuanceState::AuthorizationsPending => "authorizations-pending",
            IssuanceState::ChallengeTriggered => "challenge-triggered",
            IssuanceState::AuthorizationValid => "authorization-valid",
            IssuanceState::CsrSubmitted => "csr-submitted",
            IssuanceState::OrderValid => "order-valid",
            IssuanceState::CertificateRetrieved => "certificate-retrieved",
            IssuanceState::Exported => "exported",
        })
    }
}

/// Outcome of a run in which the authority issued a certificate
///
/// Export runs after issuance has succeeded, so its failure is carried here
/// rather than turning the run into an [`IssuanceFailure`].
#[derive(Debug)]
pub struct IssuanceReport {
    pub domain: String,
    /// Every state entered, starting with `Start`
    pub states: Vec<IssuanceState>,
    pub account_url: Option<String>,
    pub certificate: CertificateBundle,
    pub chain_path: PathBuf,
    pub keystore_path: Option<PathBuf>,
    pub export_error: Option<AcmeError>,
    pub elapsed: Duration,
}

impl IssuanceReport {
    pub fn final_state(&self) -> IssuanceState {
        self.states
            .last()
            .copied()
            .unwrap_or(IssuanceState::Start)
    }

    pub fn is_exported(&self) -> bool {
        self.export_error.is_none()
    }
}

/// What a bounded poll is waiting on
#[derive(Clone, Copy)]
enum PollTarget<'a> {
    Challenge(&'a Challenge),
    Order,
}

impl PollTarget<'_> {
    fn subject(&self) -> PollSubject {
        match self {
            PollTarget::Challenge(_) => PollSubject::Challenge,
            PollTarget::Order => PollSubject::Order,
        }
    }
}

struct Progress {
    domain: String,
    state: IssuanceState,
    history: Vec<IssuanceState>,
    published_token: Option<String>,
}

impl Progress {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: IssuanceState::Start,
            history: vec![IssuanceState::Start],
            published_token: None,
        }
    }

    fn advance(&mut self, next: IssuanceState) {
        info!(
            domain = %self.domain,
            from = %self.state,
            to = %next,
            "Issuance state transition"
        );
        self.state = next;
        self.history.push(next);
    }
}

struct Issued {
    account_url: Option<String>,
    certificate: CertificateBundle,
    chain_path: PathBuf,
    keystore_path: Option<PathBuf>,
    export_error: Option<AcmeError>,
}

/// Drives one domain through ACME HTTP-01 issuance
pub struct IssuanceOrchestrator<C, E> {
    config: Arc<AcmeConfig>,
    client: C,
    exporter: E,
    challenges: ChallengeStore,
    keys: KeyMaterialProvider,
    storage: CertificateStorage,
    poll_policy: PollPolicy,
}

impl<C, E> IssuanceOrchestrator<C, E>
where
    C: ProtocolClient,
    E: KeystoreExporter,
{
    /// Create an orchestrator publishing challenges into `challenges`.
    ///
    /// The poll policy and file locations come from `config`.
    pub fn new(config: Arc<AcmeConfig>, client: C, exporter: E, challenges: ChallengeStore) -> Self {
        let poll_policy = PollPolicy::new(config.polling.interval(), config.polling.max_attempts);
        let storage = CertificateStorage::new(config.files.clone());

        Self {
            config,
            client,
            exporter,
            challenges,
            keys: KeyMaterialProvider::new(),
            storage,
            poll_policy,
        }
    }

    /// Run issuance once.
    ///
    /// `cancel` aborts the run at the next poll wait or step boundary with
    /// [`AcmeError::Cancelled`]. When the configuration sets a run timeout the
    /// whole run is bounded by it and fails with
    /// [`AcmeError::DeadlineExceeded`].
    pub async fn issue(&self, cancel: &CancellationToken) -> Result<IssuanceReport, IssuanceFailure> {
        let started = Instant::now();
        let mut progress = Progress::new(&self.config.domain);

        info!(
            domain = %self.config.domain,
            directory = %self.config.directory_url(),
            "Starting certificate issuance"
        );

        let outcome = match self.config.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run(&mut progress, cancel))
                .await
                .unwrap_or(Err(AcmeError::DeadlineExceeded(limit))),
            None => self.run(&mut progress, cancel).await,
        };

        if let Some(token) = progress.published_token.take() {
            self.challenges.remove(&token);
        }

        match outcome {
            Ok(issued) => {
                let report = IssuanceReport {
                    domain: progress.domain,
                    states: progress.history,
                    account_url: issued.account_url,
                    certificate: issued.certificate,
                    chain_path: issued.chain_path,
                    keystore_path: issued.keystore_path,
                    export_error: issued.export_error,
                    elapsed: started.elapsed(),
                };
                info!(
                    domain = %report.domain,
                    state = %report.final_state(),
                    expires = ?report.certificate.not_after(),
                    elapsed_secs = report.elapsed.as_secs(),
                    "Certificate issuance completed"
                );
                Ok(report)
            }
            Err(error) => {
                error!(
                    domain = %progress.domain,
                    state = %progress.state,
                    kind = %error.kind(),
                    error = %error,
                    "Certificate issuance failed"
                );
                Err(IssuanceFailure {
                    domain: progress.domain,
                    state: progress.state,
                    error,
                })
            }
        }
    }

    async fn run(&self, progress: &mut Progress, cancel: &CancellationToken) -> Result<Issued, AcmeError> {
        let domain = self.config.domain.as_str();
        let files = &self.config.files;

        validate_domain_name(domain).map_err(AcmeError::Precondition)?;
        if files.account_key == files.domain_key {
            return Err(AcmeError::Precondition(format!(
                "account and domain keys must be stored in different files (both are {:?})",
                files.account_key
            )));
        }

        // Start -> AccountReady
        ensure_active(cancel)?;
        let (account_key, origin) = self.keys.load_or_create_with_origin(&files.account_key)?;
        let bound = self
            .client
            .bind_or_create_account(&account_key, origin, self.config.accept_terms_of_service)
            .await?;
        debug!(
            domain = %domain,
            account = ?bound.location,
            "Bound ACME account"
        );
        progress.advance(IssuanceState::AccountReady);

        // AccountReady -> OrderCreated
        ensure_active(cancel)?;
        let mut order = self.client.create_order(&bound.account, domain).await?;
        progress.advance(IssuanceState::OrderCreated);

        // OrderCreated -> AuthorizationsPending
        ensure_active(cancel)?;
        let authorizations = self.client.authorizations(&mut order).await?;
        let authorization = single_authorization(domain, authorizations)?;
        progress.advance(IssuanceState::AuthorizationsPending);

        // AuthorizationsPending -> (ChallengeTriggered ->) AuthorizationValid
        self.authorize(&mut order, &authorization, progress, cancel)
            .await?;

        // AuthorizationValid -> CsrSubmitted
        ensure_active(cancel)?;
        let domain_key = self.keys.load_or_create(&files.domain_key)?;
        if domain_key.same_key_as(&bound.public_key_der) {
            return Err(AcmeError::Precondition(
                "domain key pair must differ from the account key pair".to_string(),
            ));
        }
        let request = domain_key
            .certificate_request(domain)
            .map_err(|e| AcmeError::KeyMaterial {
                path: files.domain_key.clone(),
                message: format!("cannot sign certificate request: {}", e),
            })?;
        self.storage.save_csr(&request.pem)?;
        self.client.submit_csr(&mut order, &request.der).await?;
        debug!(
            domain = %domain,
            domain_key = %short(&domain_key.fingerprint()),
            "Submitted certificate signing request"
        );
        progress.advance(IssuanceState::CsrSubmitted);

        // CsrSubmitted -> OrderValid
        self.poll_until_valid(&mut order, PollTarget::Order, cancel)
            .await?;
        progress.advance(IssuanceState::OrderValid);

        // OrderValid -> CertificateRetrieved
        ensure_active(cancel)?;
        let certificate = self
            .client
            .certificate(&mut order)
            .await?
            .ok_or(AcmeError::CertificateMissing)?;
        progress.advance(IssuanceState::CertificateRetrieved);

        // CertificateRetrieved -> Exported
        let chain_path = self.storage.save_chain(&certificate)?;
        let export = self
            .exporter
            .export(&ExportRequest {
                key_path: &files.domain_key,
                chain_path: &chain_path,
                keystore_path: &self.config.keystore.path,
                password: &self.config.keystore.password,
            })
            .await;

        let (keystore_path, export_error) = match export {
            Ok(path) => {
                progress.advance(IssuanceState::Exported);
                (Some(path), None)
            }
            Err(e) => {
                warn!(
                    domain = %domain,
                    error = %e,
                    "Certificate issued but keystore export failed"
                );
                (None, Some(e))
            }
        };

        Ok(Issued {
            account_url: bound.location,
            certificate,
            chain_path,
            keystore_path,
            export_error,
        })
    }

    async fn authorize(
        &self,
        order: &mut C::Order,
        authorization: &Authorization,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> Result<(), AcmeError> {
        match authorization.status {
            Status::Valid => {
                info!(domain = %authorization.domain, "Authorization already valid, skipping challenge");
                progress.advance(IssuanceState::AuthorizationValid);
                return Ok(());
            }
            Status::Invalid => {
                return Err(AcmeError::InvalidStatus {
                    subject: PollSubject::Authorization,
                    detail: Some("reported before any challenge was triggered".to_string()),
                });
            }
            Status::Pending => {}
        }

        let challenge = authorization
            .find_challenge(&ChallengeKind::Http01)
            .ok_or_else(|| AcmeError::ChallengeNotFound {
                domain: authorization.domain.clone(),
                wanted: ChallengeKind::Http01,
                offered: authorization.offered_kinds(),
            })?;

        match challenge.status {
            Status::Valid => {
                info!(
                    domain = %authorization.domain,
                    token = %challenge.token,
                    "HTTP-01 challenge already valid, not triggering"
                );
                progress.advance(IssuanceState::AuthorizationValid);
                return Ok(());
            }
            Status::Invalid => {
                return Err(AcmeError::InvalidStatus {
                    subject: PollSubject::Challenge,
                    detail: Some("reported before the challenge was triggered".to_string()),
                });
            }
            Status::Pending => {}
        }

        // Published before triggering: the validation request may arrive
        // as soon as the authority hears we are ready.
        self.challenges
            .put(&challenge.token, &challenge.key_authorization);
        progress.published_token = Some(challenge.token.clone());

        ensure_active(cancel)?;
        self.client.trigger_challenge(order, challenge).await?;
        progress.advance(IssuanceState::ChallengeTriggered);

        self.poll_until_valid(order, PollTarget::Challenge(challenge), cancel)
            .await?;

        self.challenges.remove(&challenge.token);
        progress.published_token = None;
        progress.advance(IssuanceState::AuthorizationValid);
        Ok(())
    }

    /// Poll until the target is valid, invalid, or the attempts run out
    async fn poll_until_valid(
        &self,
        order: &mut C::Order,
        target: PollTarget<'_>,
        cancel: &CancellationToken,
    ) -> Result<u32, AcmeError> {
        let subject = target.subject();
        let mut poller = Poller::new(self.poll_policy, cancel.clone());

        while let Some(attempt) = poller.next_attempt().await? {
            let status = match target {
                PollTarget::Challenge(challenge) => {
                    self.client.challenge_status(order, challenge).await?
                }
                PollTarget::Order => self.client.order_status(order).await?,
            };

            debug!(
                subject = %subject,
                attempt,
                max_attempts = self.poll_policy.max_attempts,
                status = %status,
                "Polled status"
            );

            match status {
                Status::Valid => {
                    debug!(
                        subject = %subject,
                        attempts = attempt,
                        elapsed_ms = poller.elapsed().as_millis() as u64,
                        "Status is valid"
                    );
                    return Ok(attempt);
                }
                Status::Invalid => {
                    return Err(AcmeError::InvalidStatus {
                        subject,
                        detail: Some(format!("reported on attempt {}", attempt)),
                    });
                }
                Status::Pending => {}
            }
        }

        Err(AcmeError::PollTimeout {
            subject,
            attempts: poller.attempts(),
        })
    }
}

impl<C, E> fmt::Debug for IssuanceOrchestrator<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuanceOrchestrator")
            .field("domain", &self.config.domain)
            .field("directory", &self.config.directory_url())
            .field("poll_policy", &self.poll_policy)
            .finish_non_exhaustive()
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), AcmeError> {
    if cancel.is_cancelled() {
        Err(AcmeError::Cancelled)
    } else {
        Ok(())
    }
}

/// The order's only authorization, which must be for `domain`
fn single_authorization(
    domain: &str,
    mut authorizations: Vec<Authorization>,
) -> Result<Authorization, AcmeError> {
    if authorizations.len() != 1 {
        return Err(AcmeError::RemoteProtocol(format!(
            "expected exactly one authorization for {}, the authority returned {}",
            domain,
            authorizations.len()
        )));
    }

    let authorization = authorizations.remove(0);
    let wanted = domain.trim_end_matches('.');
    if !authorization
        .domain
        .trim_end_matches('.')
        .eq_ignore_ascii_case(wanted)
    {
        return Err(AcmeError::RemoteProtocol(format!(
            "authorization is for {}, expected {}",
            authorization.domain, domain
        )));
    }
    Ok(authorization)
}

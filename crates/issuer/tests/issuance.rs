//! End-to-end issuance runs against a scripted authority.

mod support;

use std::sync::Arc;
use std::time::Duration;

use certmint_config::AcmeConfig;
use certmint_issuer::acme::{
    AcmeError, ChallengeKind, ChallengeStore, ErrorKind, IssuanceOrchestrator, IssuanceState,
    KeyMaterial, KeyOrigin, PollSubject, Status,
};
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use support::{config_in, offsets_secs, RecordingExporter, ScriptedAuthority, DOMAIN, TOKEN};

fn orchestrator(
    config: AcmeConfig,
    authority: ScriptedAuthority,
    exporter: RecordingExporter,
    store: ChallengeStore,
) -> IssuanceOrchestrator<ScriptedAuthority, RecordingExporter> {
    IssuanceOrchestrator::new(Arc::new(config), authority, exporter, store)
}

#[tokio::test(start_paused = true)]
async fn test_issues_and_exports_for_example_org() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let store = ChallengeStore::new();
    let authority = ScriptedAuthority::new()
        .with_challenge_statuses(vec![
            Status::Pending,
            Status::Pending,
            Status::Pending,
            Status::Valid,
        ])
        .with_order_statuses(vec![Status::Valid])
        .observing(store.clone());
    let log = authority.log();
    let exporter = RecordingExporter::new();
    let orchestrator = orchestrator(config.clone(), authority, exporter.clone(), store.clone());

    let report = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.domain, DOMAIN);
    assert_eq!(report.final_state(), IssuanceState::Exported);
    assert_eq!(
        report.states,
        vec![
            IssuanceState::Start,
            IssuanceState::AccountReady,
            IssuanceState::OrderCreated,
            IssuanceState::AuthorizationsPending,
            IssuanceState::ChallengeTriggered,
            IssuanceState::AuthorizationValid,
            IssuanceState::CsrSubmitted,
            IssuanceState::OrderValid,
            IssuanceState::CertificateRetrieved,
            IssuanceState::Exported,
        ]
    );
    assert!(report.is_exported());
    assert_eq!(report.keystore_path.as_deref(), Some(config.keystore.path.as_path()));
    assert_eq!(report.elapsed, Duration::from_secs(9));

    let log = log.lock().unwrap();
    assert_eq!(log.accounts_bound, 1);
    assert_eq!(log.orders_created, 1);
    assert_eq!(log.triggers, 1);
    assert_eq!(log.published_at_trigger, Some(true));
    let triggered_at = log.triggered_at.unwrap();
    assert_eq!(offsets_secs(triggered_at, &log.challenge_polls), vec![0, 3, 6, 9]);
    assert_eq!(log.order_polls.len(), 1);
    assert_eq!(log.certificate_fetches, 1);

    // Files on disk
    assert!(config.files.account_key.exists());
    assert!(config.files.domain_key.exists());
    let csr = std::fs::read_to_string(&config.files.domain_csr).unwrap();
    assert!(csr.contains("BEGIN CERTIFICATE REQUEST"));
    let chain = std::fs::read_to_string(&config.files.domain_chain).unwrap();
    assert_eq!(chain.matches("BEGIN CERTIFICATE").count(), 2);
    assert_eq!(report.chain_path, config.files.domain_chain);

    // Export got the domain key, not the account key
    let calls = exporter.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].key_path, config.files.domain_key);
    assert_eq!(calls[0].chain_path, config.files.domain_chain);
    assert_eq!(calls[0].keystore_path, config.keystore.path);
    assert_eq!(calls[0].password, "changeit");

    // Token no longer answerable
    assert_eq!(store.get(TOKEN), None);
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pending_challenge_times_out_after_ten_attempts() {
    let dir = TempDir::new().unwrap();
    let store = ChallengeStore::new();
    let authority = ScriptedAuthority::new().with_challenge_statuses(vec![Status::Pending]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        store.clone(),
    );

    let started = Instant::now();
    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::PollTimeout);
    assert_eq!(failure.state, IssuanceState::ChallengeTriggered);
    assert!(matches!(
        failure.error,
        AcmeError::PollTimeout {
            subject: PollSubject::Challenge,
            attempts: 10
        }
    ));
    assert_eq!(started.elapsed(), Duration::from_secs(27));

    let log = log.lock().unwrap();
    assert_eq!(
        offsets_secs(log.triggered_at.unwrap(), &log.challenge_polls),
        vec![0, 3, 6, 9, 12, 15, 18, 21, 24, 27]
    );
    assert!(log.csr.is_none());
    assert!(log.order_polls.is_empty());

    assert_eq!(store.get(TOKEN), None);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_challenge_aborts_without_waiting() {
    let dir = TempDir::new().unwrap();
    let authority = ScriptedAuthority::new()
        .with_challenge_statuses(vec![Status::Pending, Status::Invalid, Status::Valid]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let started = Instant::now();
    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::InvalidStatus);
    assert_eq!(failure.state, IssuanceState::ChallengeTriggered);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(log.lock().unwrap().challenge_polls.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_order_is_reported_against_the_order() {
    let dir = TempDir::new().unwrap();
    let authority = ScriptedAuthority::new()
        .with_order_statuses(vec![Status::Pending, Status::Invalid]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.state, IssuanceState::CsrSubmitted);
    assert!(matches!(
        failure.error,
        AcmeError::InvalidStatus {
            subject: PollSubject::Order,
            ..
        }
    ));
    let log = log.lock().unwrap();
    assert_eq!(log.order_polls.len(), 2);
    assert_eq!(log.certificate_fetches, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unaccepted_terms_stop_before_any_order() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.accept_terms_of_service = false;
    let authority = ScriptedAuthority::new().requiring_terms();
    let log = authority.log();
    let orchestrator = orchestrator(
        config,
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Precondition);
    assert_eq!(failure.state, IssuanceState::Start);
    assert!(failure.to_string().contains("terms of service"));

    let log = log.lock().unwrap();
    assert_eq!(log.accounts_bound, 0);
    assert_eq!(log.orders_created, 0);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_terms_pass_the_gate() {
    let dir = TempDir::new().unwrap();
    let authority = ScriptedAuthority::new().requiring_terms();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let report = orchestrator.issue(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.final_state(), IssuanceState::Exported);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_domain_is_rejected_before_binding() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.domain = "*.example.org".to_string();
    let authority = ScriptedAuthority::new();
    let log = authority.log();
    let orchestrator = orchestrator(
        config.clone(),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Precondition);
    assert_eq!(failure.state, IssuanceState::Start);
    assert_eq!(log.lock().unwrap().accounts_bound, 0);
    assert!(!config.files.account_key.exists());
}

#[tokio::test(start_paused = true)]
async fn test_shared_key_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.files.domain_key = config.files.account_key.clone();
    let orchestrator = orchestrator(
        config,
        ScriptedAuthority::new(),
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Precondition);
}

#[tokio::test(start_paused = true)]
async fn test_missing_http01_challenge() {
    let dir = TempDir::new().unwrap();
    let store = ChallengeStore::new();
    let authority = ScriptedAuthority::new().offering(vec![
        ChallengeKind::Dns01,
        ChallengeKind::TlsAlpn01,
    ]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        store.clone(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ChallengeNotFound);
    assert_eq!(failure.state, IssuanceState::AuthorizationsPending);
    let message = failure.to_string();
    assert!(message.contains("dns-01"));
    assert!(message.contains("tls-alpn-01"));

    assert_eq!(log.lock().unwrap().triggers, 0);
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_valid_authorization_skips_the_challenge() {
    let dir = TempDir::new().unwrap();
    let store = ChallengeStore::new();
    let authority = ScriptedAuthority::new().with_authorization_status(Status::Valid);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        store.clone(),
    );

    let report = orchestrator.issue(&CancellationToken::new()).await.unwrap();

    assert!(!report.states.contains(&IssuanceState::ChallengeTriggered));
    assert!(report.states.contains(&IssuanceState::AuthorizationValid));
    assert_eq!(report.final_state(), IssuanceState::Exported);

    let log = log.lock().unwrap();
    assert_eq!(log.triggers, 0);
    assert!(log.challenge_polls.is_empty());
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_valid_challenge_is_not_triggered_again() {
    let dir = TempDir::new().unwrap();
    let authority = ScriptedAuthority::new().with_initial_challenge_status(Status::Valid);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let report = orchestrator.issue(&CancellationToken::new()).await.unwrap();

    assert!(!report.states.contains(&IssuanceState::ChallengeTriggered));
    let log = log.lock().unwrap();
    assert_eq!(log.triggers, 0);
    assert!(log.challenge_polls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_authorization_fails_before_publishing() {
    let dir = TempDir::new().unwrap();
    let store = ChallengeStore::new();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        ScriptedAuthority::new().with_authorization_status(Status::Invalid),
        RecordingExporter::new(),
        store.clone(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::InvalidStatus);
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_csr_is_signed_by_the_domain_key() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let authority = ScriptedAuthority::new();
    let log = authority.log();
    let orchestrator = orchestrator(
        config.clone(),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    orchestrator.issue(&CancellationToken::new()).await.unwrap();

    let log = log.lock().unwrap();
    let csr_der = log.csr.clone().unwrap();
    let (_, csr) = X509CertificationRequest::from_der(&csr_der).unwrap();
    let csr_key = csr.certification_request_info.subject_pki.raw.to_vec();

    let account_key = log.account_public_key.clone().unwrap();
    assert_ne!(csr_key, account_key);

    let domain_pem = std::fs::read_to_string(&config.files.domain_key).unwrap();
    let domain_key = KeyMaterial::from_pem(&domain_pem).unwrap();
    assert_eq!(csr_key, domain_key.public_key_der());
}

#[tokio::test(start_paused = true)]
async fn test_second_run_reuses_both_keys() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());

    let first = ScriptedAuthority::new();
    let first_log = first.log();
    orchestrator(config.clone(), first, RecordingExporter::new(), ChallengeStore::new())
        .issue(&CancellationToken::new())
        .await
        .unwrap();
    let domain_key_before = std::fs::read_to_string(&config.files.domain_key).unwrap();

    let second = ScriptedAuthority::new();
    let second_log = second.log();
    orchestrator(config.clone(), second, RecordingExporter::new(), ChallengeStore::new())
        .issue(&CancellationToken::new())
        .await
        .unwrap();
    let domain_key_after = std::fs::read_to_string(&config.files.domain_key).unwrap();

    assert_eq!(
        first_log.lock().unwrap().account_public_key,
        second_log.lock().unwrap().account_public_key
    );
    assert_eq!(domain_key_before, domain_key_after);
}

#[tokio::test(start_paused = true)]
async fn test_account_key_origin_reaches_the_authority() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());

    let first = ScriptedAuthority::new();
    let first_log = first.log();
    orchestrator(config.clone(), first, RecordingExporter::new(), ChallengeStore::new())
        .issue(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first_log.lock().unwrap().account_key_origins, vec![KeyOrigin::Created]);

    let second = ScriptedAuthority::new();
    let second_log = second.log();
    orchestrator(config, second, RecordingExporter::new(), ChallengeStore::new())
        .issue(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second_log.lock().unwrap().account_key_origins, vec![KeyOrigin::Existing]);
}

#[tokio::test(start_paused = true)]
async fn test_export_failure_keeps_the_certificate() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let orchestrator = orchestrator(
        config.clone(),
        ScriptedAuthority::new(),
        RecordingExporter::failing(),
        ChallengeStore::new(),
    );

    let report = orchestrator.issue(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.final_state(), IssuanceState::CertificateRetrieved);
    assert!(!report.is_exported());
    assert!(report.keystore_path.is_none());
    assert_eq!(
        report.export_error.as_ref().map(AcmeError::kind),
        Some(ErrorKind::ExternalTool)
    );
    assert!(config.files.domain_chain.exists());
    assert_eq!(report.certificate.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_certificate_is_an_io_failure() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let exporter = RecordingExporter::new();
    let orchestrator = orchestrator(
        config.clone(),
        ScriptedAuthority::new().without_certificate(),
        exporter.clone(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Io);
    assert_eq!(failure.state, IssuanceState::OrderValid);
    assert!(!config.files.domain_chain.exists());
    assert!(exporter.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_poll_is_not_a_timeout() {
    let dir = TempDir::new().unwrap();
    let store = ChallengeStore::new();
    let authority = ScriptedAuthority::new().with_challenge_statuses(vec![Status::Pending]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config_in(dir.path()),
        authority,
        RecordingExporter::new(),
        store.clone(),
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let failure = orchestrator.issue(&cancel).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.state, IssuanceState::ChallengeTriggered);
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(log.lock().unwrap().challenge_polls.len(), 3);
    assert_eq!(store.get(TOKEN), None);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_touches_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let authority = ScriptedAuthority::new();
    let log = authority.log();
    let orchestrator = orchestrator(
        config.clone(),
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let failure = orchestrator.issue(&cancel).await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Cancelled);
    assert_eq!(failure.state, IssuanceState::Start);
    assert_eq!(log.lock().unwrap().accounts_bound, 0);
    assert!(!config.files.account_key.exists());
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.run_timeout_secs = Some(10);
    let store = ChallengeStore::new();
    let orchestrator = orchestrator(
        config,
        ScriptedAuthority::new().with_challenge_statuses(vec![Status::Pending]),
        RecordingExporter::new(),
        store.clone(),
    );

    let started = Instant::now();
    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::DeadlineExceeded);
    assert_eq!(failure.state, IssuanceState::ChallengeTriggered);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(store.get(TOKEN), None);
}

#[tokio::test(start_paused = true)]
async fn test_custom_poll_policy_from_config() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.polling.interval_secs = 1;
    config.polling.max_attempts = 4;
    let authority = ScriptedAuthority::new().with_challenge_statuses(vec![Status::Pending]);
    let log = authority.log();
    let orchestrator = orchestrator(
        config,
        authority,
        RecordingExporter::new(),
        ChallengeStore::new(),
    );

    let failure = orchestrator
        .issue(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        AcmeError::PollTimeout { attempts: 4, .. }
    ));
    let log = log.lock().unwrap();
    assert_eq!(
        offsets_secs(log.triggered_at.unwrap(), &log.challenge_polls),
        vec![0, 1, 2, 3]
    );
}

//! Certmint - Main entry point
//!
//! Issues a TLS certificate for one domain via ACME HTTP-01 and exports it as
//! a PKCS#12 keystore.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use certmint_config::{AcmeConfig, FailurePolicy};
use certmint_issuer::acme::{
    CertificateStorage, ChallengeResponder, ChallengeStore, InstantAcmeClient,
    IssuanceOrchestrator, OpensslExporter,
};
use certmint_issuer::{init_logging, LogFormat};

/// How often expired challenge tokens are purged
const CHALLENGE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Certmint - ACME HTTP-01 certificate issuance
#[derive(Parser, Debug)]
#[command(name = "certmint")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "CERTMINT_CONFIG",
        default_value = "certmint.kdl",
        global = true
    )]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one issuance (default)
    Issue {
        /// Keep answering challenges after the run until interrupted
        #[arg(long = "serve")]
        serve: bool,
    },
    /// Validate configuration file and exit
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(cli.verbose, format).context("Failed to initialize logging")?;

    match cli.command {
        Some(Commands::Check) => check_config(&cli.config),
        Some(Commands::Issue { serve }) => run_issue(&cli.config, serve),
        None => run_issue(&cli.config, false),
    }
}

fn load_config(path: &Path) -> Result<Arc<AcmeConfig>> {
    let config = AcmeConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(Arc::new(config))
}

/// Validate the configuration file and report the current certificate
fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    info!("Configuration test successful:");
    info!("  - domain: {}", config.domain);
    info!("  - directory: {}", config.directory_url());
    info!("  - issuance enabled: {}", config.enabled);

    match CertificateStorage::new(config.files.clone()).load_chain() {
        Ok(Some(chain)) => match chain.not_after() {
            Some(expires) => info!("  - current certificate expires {}", expires),
            None => warn!("  - current certificate has an unreadable expiry"),
        },
        Ok(None) => info!("  - no certificate issued yet"),
        Err(e) => warn!("  - existing certificate chain is unreadable: {}", e),
    }

    println!(
        "certmint: configuration file {} test is successful",
        path.display()
    );
    Ok(())
}

/// Run one issuance with the challenge responder listening alongside
fn run_issue(path: &Path, keep_serving: bool) -> Result<()> {
    let config = load_config(path)?;

    if !config.enabled {
        info!(
            domain = %config.domain,
            "ACME issuance is disabled (set `enabled #true` to enable), nothing to do"
        );
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(issue(config, keep_serving))
}

async fn issue(config: Arc<AcmeConfig>, keep_serving: bool) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let (store, sweeper) = ChallengeStore::with_sweeper(CHALLENGE_SWEEP_PERIOD);

    let listener = TcpListener::bind(&config.challenge_listen)
        .await
        .with_context(|| {
            format!(
                "Failed to bind challenge responder on {}",
                config.challenge_listen
            )
        })?;
    let server = tokio::spawn(ChallengeResponder::new(store.clone()).serve(listener, shutdown.clone()));

    let client = InstantAcmeClient::new(&config).context("Failed to create ACME client")?;
    let exporter = OpensslExporter::new(config.keystore.tool.clone());
    let orchestrator = IssuanceOrchestrator::new(config.clone(), client, exporter, store);

    let outcome = match orchestrator.issue(&shutdown).await {
        Ok(report) => {
            if let Some(e) = &report.export_error {
                warn!(
                    domain = %report.domain,
                    chain = %report.chain_path.display(),
                    error = %e,
                    "Certificate issued, keystore not exported"
                );
            }
            Ok(())
        }
        Err(failure) => match config.on_failure {
            FailurePolicy::Abort => Err(anyhow::Error::new(failure)),
            FailurePolicy::Warn => {
                warn!(
                    domain = %failure.domain,
                    kind = %failure.kind(),
                    error = %failure,
                    "Certificate issuance failed, continuing as configured"
                );
                Ok(())
            }
        },
    };

    if keep_serving && !shutdown.is_cancelled() {
        info!("Serving ACME challenges until interrupted");
        shutdown.cancelled().await;
    }

    shutdown.cancel();
    server
        .await
        .context("Challenge responder task failed")?
        .context("Challenge responder stopped with an error")?;
    sweeper.abort();

    outcome
}

/// Cancel `shutdown` on Ctrl-C
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });
}

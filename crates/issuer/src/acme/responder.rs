//! HTTP-01 challenge responder
//!
//! Answers `GET /.well-known/acme-challenge/<token>` from a [`ChallengeStore`].
//! Known tokens get `200 text/plain` with the key authorization; anything else
//! gets `404`.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::challenge::ChallengeStore;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Serves published challenges over HTTP
#[derive(Debug, Clone)]
pub struct ChallengeResponder {
    store: ChallengeStore,
}

impl ChallengeResponder {
    pub fn new(store: ChallengeStore) -> Self {
        Self { store }
    }

    /// Key authorization to answer `token` with, if any
    pub fn respond(&self, token: &str) -> Option<String> {
        self.store.get(token)
    }

    /// Check if this is an ACME challenge request path
    ///
    /// Returns `Some(token)` if the path matches the challenge prefix,
    /// `None` otherwise.
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// Router answering challenge requests
    pub fn router(&self) -> Router {
        Router::new()
            .route("/.well-known/acme-challenge/:token", get(handle_challenge))
            .with_state(self.clone())
    }

    /// Serve on `listener` until `shutdown` fires
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        info!(address = ?addr, "ACME challenge responder listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("ACME challenge responder stopped");
        Ok(())
    }
}

async fn handle_challenge(
    Path(token): Path<String>,
    State(responder): State<ChallengeResponder>,
) -> Response {
    match responder.respond(&token) {
        Some(key_authorization) => {
            debug!(token = %token, "Serving ACME challenge response");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                key_authorization,
            )
                .into_response()
        }
        None => {
            warn!(token = %token, "ACME challenge token not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

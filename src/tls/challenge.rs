//! HTTP-01 challenge listener.
//!
//! Let's Encrypt proves domain ownership by fetching
//! `http://{domain}/.well-known/acme-challenge/{token}`. During an order the
//! certificate manager starts a short-lived listener that serves pending
//! tokens from a shared map and tears it down once validation finishes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{OrchestrateError, Result};

/// A pending HTTP-01 challenge keyed by its token.
#[derive(Debug, Clone)]
pub struct ChallengeData {
    pub token: String,
    pub key_auth: String,
    pub domain: String,
    pub expires_at: DateTime<Utc>,
}

pub type SharedChallenges = Arc<RwLock<HashMap<String, ChallengeData>>>;

pub fn new_shared_challenges() -> SharedChallenges {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Serve a pending challenge token.
///
/// Responds 200 with the key authorization as plain text, 404 for unknown
/// tokens, 410 for expired ones.
pub async fn handle_acme_challenge(
    Path(token): Path<String>,
    State(challenges): State<SharedChallenges>,
) -> Response {
    let challenges_guard = challenges.read().await;

    match challenges_guard.get(&token) {
        Some(challenge) => {
            if challenge.expires_at < Utc::now() {
                info!(
                    "ACME challenge expired for token: {} (domain: {})",
                    token, challenge.domain
                );
                return (StatusCode::GONE, "Challenge expired").into_response();
            }

            info!(
                "Serving ACME challenge for token: {} (domain: {})",
                token, challenge.domain
            );
            let headers = [(axum::http::header::CONTENT_TYPE, "text/plain")];
            (StatusCode::OK, headers, challenge.key_auth.clone()).into_response()
        }
        None => {
            debug!("ACME challenge not found for token: {}", token);
            (StatusCode::NOT_FOUND, "Challenge not found").into_response()
        }
    }
}

/// Short-lived listener that serves pending challenges for one order.
pub struct ChallengeServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ChallengeServer {
    /// Bind the challenge port and start serving in the background.
    pub async fn start(port: u16, challenges: SharedChallenges) -> Result<Self> {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
            OrchestrateError::ChallengeFailed {
                domain: String::new(),
                detail: format!("failed to bind challenge listener on {}: {}", bind_addr, e),
            }
        })?;
        let addr = listener.local_addr().map_err(|e| OrchestrateError::ChallengeFailed {
            domain: String::new(),
            detail: format!("failed to resolve challenge listener address: {}", e),
        })?;

        let app = Router::new()
            .route("/.well-known/acme-challenge/:token", get(handle_acme_challenge))
            .with_state(challenges);

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Challenge listener error: {}", e);
            }
        });

        info!("ACME challenge listener bound on {}", addr);
        Ok(Self { addr, shutdown, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving and wait for the listener task to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
        debug!("ACME challenge listener stopped");
    }
}

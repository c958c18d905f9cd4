//! Certificate lifecycle manager.
//!
//! `ensure_certificate` is idempotent: with a valid, not-expiring-soon
//! certificate on disk it returns the existing paths without any network
//! traffic. Otherwise it runs the HTTP-01 flow behind a short-lived
//! challenge listener and installs the result atomically. Per-domain
//! failures never block other domains; `renew_all` aggregates outcomes and
//! signals a graceful proxy reload when at least one domain was renewed.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::LetsEncryptConfig;
use crate::error::OrchestrateError;
use crate::tls::acme::AcmeClient;
use crate::tls::challenge::{new_shared_challenges, ChallengeServer};
use crate::tls::preflight::DnsPreflightCheck;
use crate::tls::store::{CertificateStore, StoredCertificate};

/// Per-domain result of an ensure/renew pass.
#[derive(Debug)]
pub enum CertificateOutcome {
    /// A valid certificate was already present; no challenge was run.
    Valid { cert: StoredCertificate },
    /// A certificate was obtained and installed. `renewal` distinguishes
    /// replacing existing material from first issuance.
    Issued {
        domain: String,
        fullchain_path: PathBuf,
        privkey_path: PathBuf,
        expires_at: Option<DateTime<Utc>>,
        renewal: bool,
    },
    Failed {
        domain: String,
        error: OrchestrateError,
    },
}

impl CertificateOutcome {
    pub fn domain(&self) -> &str {
        match self {
            Self::Valid { cert } => &cert.domain,
            Self::Issued { domain, .. } => domain,
            Self::Failed { domain, .. } => domain,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, Self::Issued { .. })
    }
}

pub struct CertificateManager {
    config: LetsEncryptConfig,
    store: CertificateStore,
    acme: Arc<dyn AcmeClient>,
    preflight: DnsPreflightCheck,
}

impl CertificateManager {
    pub fn new(config: LetsEncryptConfig, store: CertificateStore, acme: Arc<dyn AcmeClient>) -> Self {
        let preflight = DnsPreflightCheck::new(config.dns_preflight, config.public_ip_url.clone());
        Self {
            config,
            store,
            acme,
            preflight,
        }
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Ensure a valid certificate exists for `domain`.
    pub async fn ensure_certificate(&self, domain: &str, force: bool) -> CertificateOutcome {
        let mut renewal = false;

        if !force {
            match self.store.inspect(domain) {
                Ok(Some(cert))
                    if !cert.expires_within(self.config.renew_days_before_expiry, Utc::now()) =>
                {
                    debug!(
                        "Certificate for {} is valid for {} more days, skipping issuance",
                        domain,
                        cert.days_until_expiry(Utc::now())
                    );
                    return CertificateOutcome::Valid { cert };
                }
                Ok(Some(cert)) => {
                    info!(
                        "Certificate for {} expires {}, renewing",
                        domain, cert.expires_at
                    );
                    renewal = true;
                }
                Ok(None) => {
                    info!("No certificate for {}, requesting issuance", domain);
                }
                Err(e) => {
                    warn!("Unreadable certificate for {}: {:#}, re-issuing", domain, e);
                    renewal = true;
                }
            }
        }

        match self.obtain(domain).await {
            Ok((fullchain_path, privkey_path, expires_at)) => {
                info!(
                    "Installed certificate for {} (expires: {:?})",
                    domain, expires_at
                );
                CertificateOutcome::Issued {
                    domain: domain.to_string(),
                    fullchain_path,
                    privkey_path,
                    expires_at,
                    renewal,
                }
            }
            Err(e) => {
                error!("Certificate acquisition failed for {}: {}", domain, e);
                CertificateOutcome::Failed {
                    domain: domain.to_string(),
                    error: e,
                }
            }
        }
    }

    async fn obtain(
        &self,
        domain: &str,
    ) -> Result<(PathBuf, PathBuf, Option<DateTime<Utc>>), OrchestrateError> {
        self.preflight.check(domain).await?;

        let challenges = new_shared_challenges();
        let server = ChallengeServer::start(self.config.challenge_port, challenges.clone())
            .await
            .map_err(|e| with_domain(e, domain))?;

        let order_result = self.acme.order(domain, challenges).await;
        server.stop().await;
        let issued = order_result?;

        let (fullchain_path, privkey_path) = self
            .store
            .install(domain, &issued.fullchain_pem, &issued.privkey_pem)
            .map_err(|e| OrchestrateError::Store {
                domain: domain.to_string(),
                detail: format!("{:#}", e),
            })?;

        // Expiry comes from re-reading what was just installed; a parse
        // failure here is logged, not fatal, the material is already valid.
        let expires_at = match self.store.inspect(domain) {
            Ok(Some(cert)) => Some(cert.expires_at),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read back certificate for {}: {:#}", domain, e);
                None
            }
        };

        Ok((fullchain_path, privkey_path, expires_at))
    }

    /// Ensure certificates for every configured domain. A failure for one
    /// domain is recorded and does not block the rest.
    pub async fn ensure_all(&self, force: bool) -> Vec<CertificateOutcome> {
        let mut outcomes = Vec::with_capacity(self.config.domains.len());
        for domain in &self.config.domains {
            outcomes.push(self.ensure_certificate(domain, force).await);
        }
        outcomes
    }

    /// Renew-nearing-expiry pass over all domains. When at least one
    /// certificate was issued or renewed, the reverse proxy is signaled to
    /// gracefully reload; a reload failure is logged but does not fail the
    /// renewal, the material on disk is already valid.
    pub async fn renew_all(
        &self,
        force: bool,
        reloader: &dyn crate::deploy::runner::ProxyReloader,
    ) -> Vec<CertificateOutcome> {
        let outcomes = self.ensure_all(force).await;

        let issued = outcomes.iter().filter(|o| o.is_issued()).count();
        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(
            "Certificate renewal pass complete: {} issued/renewed, {} failed, {} already valid",
            issued,
            failed,
            outcomes.len() - issued - failed
        );

        if issued > 0 {
            if let Err(e) = reloader.reload().await {
                warn!("Proxy reload signal failed (certificates are installed): {:#}", e);
            }
        }

        outcomes
    }
}

fn with_domain(err: OrchestrateError, domain: &str) -> OrchestrateError {
    match err {
        OrchestrateError::ChallengeFailed { detail, .. } => OrchestrateError::ChallengeFailed {
            domain: domain.to_string(),
            detail,
        },
        other => other,
    }
}

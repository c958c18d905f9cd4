//! ACME client seam and the Let's Encrypt adapter.
//!
//! The orchestration logic only sees the [`AcmeClient`] trait; the real
//! adapter drives `acme-lib` through the HTTP-01 flow, depositing pending
//! tokens into the shared challenge map that the challenge listener serves.

use acme_lib::order::Auth;
use acme_lib::persist::FilePersist;
use acme_lib::{create_p384_key, Directory, DirectoryUrl};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::info;

use crate::config::LetsEncryptConfig;
use crate::error::{OrchestrateError, Result};
use crate::tls::challenge::{ChallengeData, SharedChallenges};

/// Certificate material produced by a completed order.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub fullchain_pem: String,
    pub privkey_pem: String,
}

/// Certificate-authority seam. The production implementation talks to
/// Let's Encrypt; tests substitute in-memory fakes.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Run one order for `domain`, publishing HTTP-01 tokens through
    /// `challenges` while the order is being validated.
    async fn order(&self, domain: &str, challenges: SharedChallenges) -> Result<IssuedCertificate>;
}

/// `acme-lib` backed client for the Let's Encrypt production or staging
/// directory. Account keys persist under `<store_dir>/accounts`.
pub struct LetsEncryptClient {
    email: String,
    staging: bool,
    account_dir: PathBuf,
}

impl LetsEncryptClient {
    pub fn new(config: &LetsEncryptConfig) -> Self {
        Self {
            email: config.email.clone(),
            staging: config.staging,
            account_dir: PathBuf::from(&config.store_dir).join("accounts"),
        }
    }

    fn directory_url(&self) -> DirectoryUrl<'_> {
        if self.staging {
            DirectoryUrl::LetsEncryptStaging
        } else {
            DirectoryUrl::LetsEncrypt
        }
    }

    async fn publish_http_challenge(
        &self,
        auth: &Auth<FilePersist>,
        domain: &str,
        challenges: &SharedChallenges,
    ) -> Result<()> {
        let challenge = auth.http_challenge();
        let token = challenge.http_token().to_string();
        let key_auth = challenge.http_proof();

        info!("Got HTTP-01 challenge for domain: {} (token: {})", domain, token);

        challenges.write().await.insert(
            token.clone(),
            ChallengeData {
                token: token.clone(),
                key_auth,
                domain: domain.to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            },
        );

        // Blocks on the CA fetching the token from our listener.
        challenge
            .validate(5000)
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        challenges.write().await.remove(&token);
        Ok(())
    }
}

#[async_trait]
impl AcmeClient for LetsEncryptClient {
    async fn order(&self, domain: &str, challenges: SharedChallenges) -> Result<IssuedCertificate> {
        if self.staging {
            info!("Using Let's Encrypt staging environment");
        }

        fs::create_dir_all(&self.account_dir)
            .context("Failed to create ACME account directory")
            .map_err(|e| classify_acme_error(domain, &format!("{:#}", e)))?;

        let persist = FilePersist::new(&self.account_dir);
        let dir = Directory::from_url(persist, self.directory_url())
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        let account = dir
            .account(&self.email)
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        let mut order = account
            .new_order(domain, &[])
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        let ord_csr = loop {
            if let Some(ord_csr) = order.confirm_validations() {
                break ord_csr;
            }

            let auths = order
                .authorizations()
                .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

            for auth in &auths {
                if !auth.need_challenge() {
                    continue;
                }
                self.publish_http_challenge(auth, domain, &challenges).await?;
            }

            order
                .refresh()
                .map_err(|e| classify_acme_error(domain, &e.to_string()))?;
        };

        info!("Domain {} authorized, finalizing certificate", domain);

        let pkey = create_p384_key();
        let ord_cert = ord_csr
            .finalize_pkey(pkey, 5000)
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        let cert = ord_cert
            .download_and_save_cert()
            .map_err(|e| classify_acme_error(domain, &e.to_string()))?;

        Ok(IssuedCertificate {
            fullchain_pem: cert.certificate().to_string(),
            privkey_pem: cert.private_key().to_string(),
        })
    }
}

/// Map an ACME error message onto the failure taxonomy.
///
/// The ACME problem documents carry `urn:ietf:params:acme:error:*` types;
/// acme-lib flattens them into the message text, so classification is by
/// substring.
pub fn classify_acme_error(domain: &str, detail: &str) -> OrchestrateError {
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("ratelimited") || lowered.contains("rate limit") {
        OrchestrateError::RateLimited {
            domain: domain.to_string(),
            detail: detail.to_string(),
        }
    } else if lowered.contains("connection")
        || lowered.contains("no valid ip addresses")
        || lowered.contains("dns problem")
        || lowered.contains("timeout during connect")
    {
        OrchestrateError::DomainUnreachable {
            domain: domain.to_string(),
            detail: detail.to_string(),
        }
    } else {
        OrchestrateError::ChallengeFailed {
            domain: domain.to_string(),
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let err = classify_acme_error(
            "app.example.com",
            "urn:ietf:params:acme:error:rateLimited: too many certificates",
        );
        assert_eq!(err.kind(), "rate_limited");
    }

    #[test]
    fn test_unreachable_classification() {
        let err = classify_acme_error(
            "app.example.com",
            "Fetching http://app.example.com/.well-known/acme-challenge/x: Connection refused",
        );
        assert_eq!(err.kind(), "domain_unreachable");

        let err = classify_acme_error(
            "app.example.com",
            "DNS problem: NXDOMAIN looking up A for app.example.com",
        );
        assert_eq!(err.kind(), "domain_unreachable");
    }

    #[test]
    fn test_default_classification_is_challenge_failed() {
        let err = classify_acme_error("app.example.com", "unauthorized: invalid response");
        assert_eq!(err.kind(), "challenge_failed");
        assert!(err.to_string().contains("app.example.com"));
    }
}

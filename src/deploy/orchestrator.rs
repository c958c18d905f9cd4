//! Deployment orchestrator.
//!
//! Validates preconditions, drives the service group through the runner,
//! and enforces one-deploy-at-a-time per service group. Readiness is not
//! waited on here; `deploy` returns once the start command was issued and
//! the health poller takes over.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::deploy::runner::ServiceRunner;
use crate::error::{OrchestrateError, Result};
use crate::tls::store::CertificateStore;

/// Snapshot reported by `status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub group: String,
    pub containers: String,
    pub certificates: Vec<CertificateStatus>,
}

#[derive(Debug, Serialize)]
pub struct CertificateStatus {
    pub domain: String,
    pub present: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_until_expiry: Option<i64>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    runner: Arc<dyn ServiceRunner>,
    store: CertificateStore,
    deploying: AtomicBool,
}

/// Holds the per-group deployment slot; released on drop.
struct DeploySlot<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DeploySlot<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, runner: Arc<dyn ServiceRunner>, store: CertificateStore) -> Self {
        Self {
            config,
            runner,
            store,
            deploying: AtomicBool::new(false),
        }
    }

    /// Precondition check: required config fields, then a valid non-expired
    /// certificate for every TLS domain. Fails before any side effect; the
    /// service group is never started with an incomplete TLS chain.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        let now = Utc::now();
        for domain in &self.config.lets_encrypt.domains {
            match self.store.inspect(domain) {
                Ok(Some(cert)) if !cert.is_expired(now) => {}
                Ok(Some(cert)) => {
                    return Err(OrchestrateError::missing_certificate(
                        domain,
                        format!("certificate expired at {}", cert.expires_at),
                    ));
                }
                Ok(None) => {
                    return Err(OrchestrateError::missing_certificate(
                        domain,
                        format!("no certificate pair under {}", self.store.root().display()),
                    ));
                }
                Err(e) => {
                    return Err(OrchestrateError::missing_certificate(
                        domain,
                        format!("unreadable certificate: {:#}", e),
                    ));
                }
            }
        }
        Ok(())
    }

    fn acquire_slot(&self) -> Result<DeploySlot<'_>> {
        if self
            .deploying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OrchestrateError::DeploymentInProgress {
                group: self.config.service_group.name.clone(),
            });
        }
        Ok(DeploySlot {
            flag: &self.deploying,
        })
    }

    /// Stop any previous instance (best-effort) and start the group.
    pub async fn deploy(&self) -> Result<()> {
        let _slot = self.acquire_slot()?;
        let group = &self.config.service_group.name;

        info!("Deploying service group {}", group);

        if let Err(e) = self.runner.down().await {
            // No previous instance (or a half-removed one) is not an error.
            warn!("Stopping previous instance of {} failed: {:#}", group, e);
        }

        self.runner.up().await.map_err(|e| OrchestrateError::Runner {
            action: "up".to_string(),
            detail: format!("{:#}", e),
        })?;

        info!("Service group {} start issued", group);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping service group {}", self.config.service_group.name);
        self.runner.down().await.map_err(|e| OrchestrateError::Runner {
            action: "down".to_string(),
            detail: format!("{:#}", e),
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let containers = self.runner.ps().await.map_err(|e| OrchestrateError::Runner {
            action: "ps".to_string(),
            detail: format!("{:#}", e),
        })?;

        let now = Utc::now();
        let certificates = self
            .config
            .lets_encrypt
            .domains
            .iter()
            .map(|domain| match self.store.inspect(domain) {
                Ok(Some(cert)) => CertificateStatus {
                    domain: domain.clone(),
                    present: true,
                    expires_at: Some(cert.expires_at),
                    days_until_expiry: Some(cert.days_until_expiry(now)),
                },
                _ => CertificateStatus {
                    domain: domain.clone(),
                    present: false,
                    expires_at: None,
                    days_until_expiry: None,
                },
            })
            .collect();

        Ok(StatusReport {
            group: self.config.service_group.name.clone(),
            containers,
            certificates,
        })
    }

    pub async fn logs(&self, tail: usize, services: &[String]) -> Result<String> {
        self.runner
            .logs(tail, services)
            .await
            .map_err(|e| OrchestrateError::Runner {
                action: "logs".to_string(),
                detail: format!("{:#}", e),
            })
    }
}

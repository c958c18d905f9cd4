//! Pre-challenge DNS sanity check.
//!
//! An HTTP-01 challenge can only succeed when the domain's A record points
//! at this host. The check compares the host's public IP with the domain's
//! resolution; whether a mismatch warns or hard-fails is an operator policy
//! (`dns_preflight` in config).

use std::net::IpAddr;
use tracing::{debug, warn};

use crate::config::DnsPreflight;
use crate::error::{OrchestrateError, Result};

pub fn addresses_match(public_ip: IpAddr, resolved: &[IpAddr]) -> bool {
    resolved.iter().any(|ip| *ip == public_ip)
}

pub struct DnsPreflightCheck {
    policy: DnsPreflight,
    public_ip_url: String,
    client: reqwest::Client,
}

impl DnsPreflightCheck {
    pub fn new(policy: DnsPreflight, public_ip_url: impl Into<String>) -> Self {
        Self {
            policy,
            public_ip_url: public_ip_url.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Run the check for one domain according to policy.
    ///
    /// Under `Warn`, any lookup failure or mismatch is logged and the
    /// challenge proceeds; under `Enforce`, a confirmed mismatch is a
    /// `DomainUnreachable` failure. Inability to discover the public IP is
    /// never fatal, the CA's own validation remains authoritative.
    pub async fn check(&self, domain: &str) -> Result<()> {
        if self.policy == DnsPreflight::Off {
            return Ok(());
        }

        let public_ip = match self.discover_public_ip().await {
            Some(ip) => ip,
            None => {
                debug!("Skipping DNS preflight for {}: public IP unknown", domain);
                return Ok(());
            }
        };

        let resolved = self.resolve(domain).await;
        if resolved.is_empty() {
            let detail = format!("domain {} did not resolve to any address", domain);
            return self.verdict(domain, detail);
        }

        if addresses_match(public_ip, &resolved) {
            debug!("DNS preflight ok for {}: resolves to {}", domain, public_ip);
            return Ok(());
        }

        let detail = format!(
            "domain {} resolves to {:?} but this host's public IP is {}",
            domain, resolved, public_ip
        );
        self.verdict(domain, detail)
    }

    fn verdict(&self, domain: &str, detail: String) -> Result<()> {
        match self.policy {
            DnsPreflight::Enforce => Err(OrchestrateError::DomainUnreachable {
                domain: domain.to_string(),
                detail,
            }),
            _ => {
                warn!("DNS preflight: {}", detail);
                Ok(())
            }
        }
    }

    async fn discover_public_ip(&self) -> Option<IpAddr> {
        let response = self.client.get(&self.public_ip_url).send().await.ok()?;
        let body = response.text().await.ok()?;
        body.trim().parse().ok()
    }

    async fn resolve(&self, domain: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((domain, 443)).await {
            Ok(addrs) => addrs.map(|a| a.ip()).collect(),
            Err(e) => {
                debug!("Failed to resolve {}: {}", domain, e);
                Vec::new()
            }
        }
    }
}

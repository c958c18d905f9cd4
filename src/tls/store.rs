//! Shared certificate store with a certbot-compatible layout.
//!
//! Certificates live under `<root>/live/<domain>/fullchain.pem` and
//! `privkey.pem`. Installation writes both files to temporary names in the
//! same directory and renames them into place, so a reader never observes a
//! half-written pair. A previously valid certificate is only ever replaced
//! by a successful renewal, never deleted.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// A certificate pair present on disk, with its parsed expiry.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub domain: String,
    pub fullchain_path: PathBuf,
    pub privkey_path: PathBuf,
    pub expires_at: DateTime<Utc>,
}

impl StoredCertificate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when the certificate is expired or enters the renewal window
    /// within `threshold_days`.
    pub fn expires_within(&self, threshold_days: i64, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + Duration::days(threshold_days)
    }

    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days()
    }
}

#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn live_dir(&self, domain: &str) -> PathBuf {
        self.root.join("live").join(domain)
    }

    pub fn fullchain_path(&self, domain: &str) -> PathBuf {
        self.live_dir(domain).join("fullchain.pem")
    }

    pub fn privkey_path(&self, domain: &str) -> PathBuf {
        self.live_dir(domain).join("privkey.pem")
    }

    /// Look up the certificate pair for a domain. Returns `Ok(None)` when
    /// either file is absent; a present-but-unparseable certificate is an
    /// error rather than silently treated as missing.
    pub fn inspect(&self, domain: &str) -> Result<Option<StoredCertificate>> {
        let fullchain_path = self.fullchain_path(domain);
        let privkey_path = self.privkey_path(domain);

        if !fullchain_path.exists() || !privkey_path.exists() {
            return Ok(None);
        }

        let pem = fs::read_to_string(&fullchain_path)
            .with_context(|| format!("Failed to read certificate file: {}", fullchain_path.display()))?;
        let expires_at = parse_expiry(&pem)
            .with_context(|| format!("Failed to parse certificate for domain: {}", domain))?;

        Ok(Some(StoredCertificate {
            domain: domain.to_string(),
            fullchain_path,
            privkey_path,
            expires_at,
        }))
    }

    /// Atomically install a certificate pair: write to temporary files in
    /// the target directory, then rename both into place.
    pub fn install(
        &self,
        domain: &str,
        fullchain_pem: &str,
        privkey_pem: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let dir = self.live_dir(domain);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create certificate directory: {}", dir.display()))?;

        let fullchain_path = self.fullchain_path(domain);
        let privkey_path = self.privkey_path(domain);
        let fullchain_tmp = dir.join("fullchain.pem.tmp");
        let privkey_tmp = dir.join("privkey.pem.tmp");

        fs::write(&fullchain_tmp, fullchain_pem)
            .with_context(|| format!("Failed to write certificate: {}", fullchain_tmp.display()))?;
        fs::write(&privkey_tmp, privkey_pem)
            .with_context(|| format!("Failed to write private key: {}", privkey_tmp.display()))?;

        // Key first: a reader pairing the new chain with the old key would
        // fail the TLS handshake, the reverse pairing cannot happen.
        fs::rename(&privkey_tmp, &privkey_path)
            .with_context(|| format!("Failed to install private key: {}", privkey_path.display()))?;
        fs::rename(&fullchain_tmp, &fullchain_path)
            .with_context(|| format!("Failed to install certificate: {}", fullchain_path.display()))?;

        Ok((fullchain_path, privkey_path))
    }
}

/// Extract the leaf certificate's notAfter timestamp from PEM data.
pub fn parse_expiry(pem: &str) -> Result<DateTime<Utc>> {
    use x509_parser::parse_x509_certificate;

    let mut reader = BufReader::new(pem.as_bytes());
    let cert_items = rustls_pemfile::certs(&mut reader)
        .map_err(|e| anyhow!("Failed to parse PEM certificate: {}", e))?;

    let leaf = cert_items
        .first()
        .ok_or_else(|| anyhow!("No certificates found in PEM data"))?;

    let (_, x509) = parse_x509_certificate(leaf)
        .map_err(|e| anyhow!("Failed to parse X.509 certificate: {}", e))?;

    let timestamp = x509.validity().not_after.timestamp();
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| anyhow!("Failed to convert certificate expiry to timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_layout() {
        let store = CertificateStore::new("/etc/letsencrypt");

        assert_eq!(
            store.fullchain_path("app.example.com"),
            PathBuf::from("/etc/letsencrypt/live/app.example.com/fullchain.pem")
        );
        assert_eq!(
            store.privkey_path("app.example.com"),
            PathBuf::from("/etc/letsencrypt/live/app.example.com/privkey.pem")
        );
    }

    #[test]
    fn test_parse_expiry_rejects_garbage() {
        assert!(parse_expiry("NOT A PEM FILE").is_err());
        assert!(parse_expiry("").is_err());
    }

    #[test]
    fn test_expiry_window() {
        let now = Utc::now();
        let cert = StoredCertificate {
            domain: "app.example.com".to_string(),
            fullchain_path: PathBuf::from("/tmp/fullchain.pem"),
            privkey_path: PathBuf::from("/tmp/privkey.pem"),
            expires_at: now + Duration::days(60),
        };

        assert!(!cert.is_expired(now));
        assert!(!cert.expires_within(30, now));
        assert!(cert.expires_within(90, now));
        assert_eq!(cert.days_until_expiry(now), 60);
    }

    #[test]
    fn test_expired_certificate_is_inside_any_window() {
        let now = Utc::now();
        let cert = StoredCertificate {
            domain: "app.example.com".to_string(),
            fullchain_path: PathBuf::from("/tmp/fullchain.pem"),
            privkey_path: PathBuf::from("/tmp/privkey.pem"),
            expires_at: now - Duration::days(1),
        };

        assert!(cert.is_expired(now));
        assert!(cert.expires_within(0, now));
        assert!(cert.expires_within(30, now));
    }
}

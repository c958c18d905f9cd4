use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::OrchestrateError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub service_group: ServiceGroupConfig,
    pub lets_encrypt: LetsEncryptConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceGroupConfig {
    /// Compose project name; also keys the deployment slot.
    pub name: String,
    pub compose_file: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// Name of the reverse-proxy service inside the group, used for
    /// graceful reload signaling after certificate renewal.
    #[serde(default = "default_proxy_service")]
    pub proxy_service: String,
    pub services: Vec<ServiceSpec>,
}

fn default_work_dir() -> String { ".".to_string() }
fn default_proxy_service() -> String { "proxy".to_string() }

/// A managed service and the signal that gates its readiness.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub health: HealthTarget,
    /// Per-service readiness override; extends (never shrinks) the
    /// group-wide wait window.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthTarget {
    /// HTTP GET; any 2xx status counts as healthy.
    Http { url: String },
    /// Shell command; exit code 0 counts as healthy.
    Command { command: String },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LetsEncryptConfig {
    pub email: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub staging: bool,
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    #[serde(default = "default_renew_days")]
    pub renew_days_before_expiry: i64,
    #[serde(default = "default_renew_check_interval")]
    pub renew_check_interval_secs: u64,
    #[serde(default = "default_challenge_port")]
    pub challenge_port: u16,
    #[serde(default)]
    pub dns_preflight: DnsPreflight,
    #[serde(default = "default_public_ip_url")]
    pub public_ip_url: String,
}

fn default_store_dir() -> String { "/etc/letsencrypt".to_string() }
fn default_renew_days() -> i64 { 30 }
fn default_renew_check_interval() -> u64 { 24 * 60 * 60 }
fn default_challenge_port() -> u16 { 80 }
fn default_public_ip_url() -> String { "https://api.ipify.org".to_string() }

/// Policy for the pre-challenge DNS sanity check.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DnsPreflight {
    /// Skip the check entirely.
    Off,
    /// Log a warning on mismatch but continue with the challenge.
    #[default]
    Warn,
    /// Treat a mismatch as DomainUnreachable before contacting the CA.
    Enforce,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_poll_interval() -> u64 { 5 }
fn default_max_wait() -> u64 { 180 }

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_output() -> String { "console".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: None,
        }
    }
}

impl Config {
    /// Required-field validation. Runs before any side effect; a failure
    /// here means nothing has been started or written.
    pub fn validate(&self) -> Result<(), OrchestrateError> {
        if self.service_group.name.trim().is_empty() {
            return Err(OrchestrateError::missing_config("service_group.name"));
        }
        if self.service_group.compose_file.trim().is_empty() {
            return Err(OrchestrateError::missing_config("service_group.compose_file"));
        }
        if self.service_group.services.is_empty() {
            return Err(OrchestrateError::missing_config("service_group.services"));
        }
        for service in &self.service_group.services {
            if service.name.trim().is_empty() {
                return Err(OrchestrateError::missing_config("service_group.services[].name"));
            }
        }
        if self.lets_encrypt.email.trim().is_empty() {
            return Err(OrchestrateError::missing_config("lets_encrypt.email"));
        }
        if self.lets_encrypt.domains.is_empty() {
            return Err(OrchestrateError::missing_config("lets_encrypt.domains"));
        }
        for domain in &self.lets_encrypt.domains {
            if domain.trim().is_empty() || domain.contains('/') || domain.contains(':') {
                return Err(OrchestrateError::missing_config("lets_encrypt.domains"));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [service_group]
            name = "stack"
            compose_file = "docker-compose.yml"

            [[service_group.services]]
            name = "workflow"
            health = { type = "http", url = "http://127.0.0.1:5678/healthz" }

            [lets_encrypt]
            email = "ops@example.com"
            domains = ["app.example.com"]
        "#
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();

        assert_eq!(config.service_group.work_dir, ".");
        assert_eq!(config.service_group.proxy_service, "proxy");
        assert_eq!(config.health.poll_interval_secs, 5);
        assert_eq!(config.health.max_wait_secs, 180);
        assert_eq!(config.lets_encrypt.renew_days_before_expiry, 30);
        assert_eq!(config.lets_encrypt.challenge_port, 80);
        assert_eq!(config.lets_encrypt.dns_preflight, DnsPreflight::Warn);
        assert!(!config.lets_encrypt.staging);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_health_target() {
        let toml_str = r#"
            [service_group]
            name = "stack"
            compose_file = "docker-compose.yml"

            [[service_group.services]]
            name = "db"
            health = { type = "command", command = "pg_isready -q" }
            timeout_secs = 240

            [lets_encrypt]
            email = "ops@example.com"
            domains = ["app.example.com"]
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        let spec = &config.service_group.services[0];
        assert!(matches!(spec.health, HealthTarget::Command { .. }));
        assert_eq!(spec.timeout_secs, Some(240));
    }

    #[test]
    fn test_empty_domains_is_missing_config() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.lets_encrypt.domains.clear();

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "missing_config");
        assert!(err.to_string().contains("lets_encrypt.domains"));
    }

    #[test]
    fn test_blank_email_is_missing_config() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.lets_encrypt.email = "  ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lets_encrypt.email"));
    }

    #[test]
    fn test_no_services_is_missing_config() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.service_group.services.clear();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("service_group.services"));
    }

    #[test]
    fn test_malformed_domain_rejected() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.lets_encrypt.domains = vec!["bad/domain".to_string()];

        assert!(config.validate().is_err());
    }
}

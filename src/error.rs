//! Error taxonomy for the orchestrator.
//!
//! Every failure surfaced to the operator carries the affected domain,
//! service, or config field plus a human-readable detail, so a non-zero
//! exit is never a bare status code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestrateError>;

#[derive(Error, Debug)]
pub enum OrchestrateError {
    #[error("missing or empty config field: {field}")]
    MissingConfig { field: String },

    #[error("no valid certificate for domain {domain}: {detail}")]
    MissingCertificate { domain: String, detail: String },

    #[error("ACME challenge failed for {domain}: {detail}")]
    ChallengeFailed { domain: String, detail: String },

    #[error("domain {domain} is not reachable: {detail}")]
    DomainUnreachable { domain: String, detail: String },

    #[error("certificate authority rate limit hit for {domain}: {detail}")]
    RateLimited { domain: String, detail: String },

    #[error("a deployment is already in progress for service group {group}")]
    DeploymentInProgress { group: String },

    #[error("services did not become healthy in time: {}", unhealthy.join(", "))]
    TimedOut { unhealthy: Vec<String> },

    #[error("service runner `{action}` failed: {detail}")]
    Runner { action: String, detail: String },

    #[error("certificate store error for {domain}: {detail}")]
    Store { domain: String, detail: String },
}

impl OrchestrateError {
    /// Stable machine-readable tag for each failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingConfig { .. } => "missing_config",
            Self::MissingCertificate { .. } => "missing_certificate",
            Self::ChallengeFailed { .. } => "challenge_failed",
            Self::DomainUnreachable { .. } => "domain_unreachable",
            Self::RateLimited { .. } => "rate_limited",
            Self::DeploymentInProgress { .. } => "deployment_in_progress",
            Self::TimedOut { .. } => "timed_out",
            Self::Runner { .. } => "runner",
            Self::Store { .. } => "store",
        }
    }

    pub fn missing_config(field: impl Into<String>) -> Self {
        Self::MissingConfig { field: field.into() }
    }

    pub fn missing_certificate(domain: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingCertificate {
            domain: domain.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        let err = OrchestrateError::missing_config("lets_encrypt.email");
        assert_eq!(err.kind(), "missing_config");

        let err = OrchestrateError::TimedOut {
            unhealthy: vec!["kb".to_string()],
        };
        assert_eq!(err.kind(), "timed_out");
    }

    #[test]
    fn test_display_names_affected_subject() {
        let err = OrchestrateError::missing_certificate("a.example", "not found");
        assert!(err.to_string().contains("a.example"));

        let err = OrchestrateError::TimedOut {
            unhealthy: vec!["workflow".to_string(), "kb".to_string()],
        };
        assert!(err.to_string().contains("workflow, kb"));

        let err = OrchestrateError::DeploymentInProgress {
            group: "stack".to_string(),
        };
        assert!(err.to_string().contains("stack"));
    }
}

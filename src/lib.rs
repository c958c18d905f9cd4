//! Certificate lifecycle and health-gated deployment orchestration.
//!
//! A deployment succeeds only when every domain has a valid certificate on
//! disk before the proxy starts and every managed service reports healthy
//! within the wait window. External systems (ACME directory, container
//! runtime, the services themselves) sit behind narrow seams so the
//! orchestration logic is testable with fakes.

pub mod config;
pub mod deploy;
pub mod error;
pub mod observability;
pub mod tls;

// Certificate lifecycle: ACME issuance, shared store, challenge serving.

pub mod acme;
pub mod challenge;
pub mod manager;
pub mod preflight;
pub mod store;

pub use acme::{AcmeClient, IssuedCertificate, LetsEncryptClient};
pub use challenge::{handle_acme_challenge, ChallengeData, ChallengeServer, SharedChallenges};
pub use manager::{CertificateManager, CertificateOutcome};
pub use store::{CertificateStore, StoredCertificate};

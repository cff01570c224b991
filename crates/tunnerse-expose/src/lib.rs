//! Front-door exposer for the tunnerse relay.
//!
//! Terminates TLS on :443 and routes requests by Host to local backends
//! declared in `tunnerse.config`; the plaintext :80 listener upgrades
//! configured hosts to HTTPS and serves ACME HTTP-01 challenges. TLS comes
//! either from static certificate files or from automatic ACME issuance
//! with an on-disk cache.

mod acme;
mod config;
mod server;

use thiserror::Error;

pub use acme::{AcmeSettings, CertManager, ChallengeStore};
pub use config::{DomainRule, ExposeConfig};
pub use server::{Exposer, ExposerConfig, TlsMode};

/// Front-door errors. Configuration problems are fatal at startup.
#[derive(Debug, Error)]
pub enum ExposeError {
    #[error("invalid line on config: {0}")]
    InvalidLine(String),

    #[error("invalid or null port: {0}")]
    InvalidPort(String),

    #[error("config file must contain [domains] section")]
    MissingDomains,

    #[error("[domains] section is empty, configure at least one domain")]
    EmptyDomains,

    #[error("no hosts eligible for certificate issuance")]
    NoAcmeHosts,

    #[error("ACME error: {0}")]
    Acme(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

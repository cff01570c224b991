//! ACME certificate management for the front door.
//!
//! Issues one certificate covering every configured host via HTTP-01, with
//! an on-disk cache under the certs directory: account credentials, the PEM
//! pair, and a small metadata file recording the issuance time so renewal
//! can happen without parsing the certificate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, OrderStatus, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::ExposeError;

/// Pending HTTP-01 challenge responses (token -> key authorization), served
/// by the plaintext listener at `/.well-known/acme-challenge/{token}`.
pub type ChallengeStore = Arc<RwLock<HashMap<String, String>>>;

/// ACME settings.
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// Contact email registered with the CA. Creating the account agrees to
    /// the CA's terms of service.
    pub contact_email: String,
    /// Use the staging environment (for testing).
    pub staging: bool,
    /// On-disk cache directory.
    pub cache_dir: PathBuf,
}

/// Issuance metadata stored beside the cached certificate.
#[derive(Debug, Serialize, Deserialize)]
struct CertMeta {
    issued_at: DateTime<Utc>,
    hosts: Vec<String>,
}

impl CertMeta {
    /// Let's Encrypt certificates last 90 days; reissue after 60.
    fn needs_renewal(&self) -> bool {
        Utc::now() - self.issued_at > chrono::Duration::days(60)
    }
}

/// Certificate manager for the ACME deployment mode.
pub struct CertManager {
    settings: AcmeSettings,
    /// Hosts the certificate covers. Issuance is restricted to this set,
    /// which the caller derives from the `[domains]` configuration.
    hosts: Vec<String>,
    challenges: ChallengeStore,
}

impl CertManager {
    pub fn new(settings: AcmeSettings, hosts: Vec<String>, challenges: ChallengeStore) -> Self {
        Self {
            settings,
            hosts,
            challenges,
        }
    }

    /// Whether issuance for `host` is allowed under the configured set.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|allowed| allowed == &host)
    }

    /// Return the PEM certificate chain and private key, from cache when
    /// fresh, otherwise from a new ACME order.
    pub async fn load_or_issue(&self) -> Result<(Vec<u8>, Vec<u8>), ExposeError> {
        let primary = self.hosts.first().ok_or(ExposeError::NoAcmeHosts)?;
        fs::create_dir_all(&self.settings.cache_dir).await?;

        let cert_path = self.settings.cache_dir.join(format!("{primary}.crt"));
        let key_path = self.settings.cache_dir.join(format!("{primary}.key"));
        let meta_path = self.settings.cache_dir.join(format!("{primary}.json"));

        if let Ok(meta_json) = fs::read_to_string(&meta_path).await {
            if let Ok(meta) = serde_json::from_str::<CertMeta>(&meta_json) {
                let covers_all = self.hosts.iter().all(|h| meta.hosts.contains(h));
                if covers_all && !meta.needs_renewal() {
                    if let (Ok(cert), Ok(key)) =
                        (fs::read(&cert_path).await, fs::read(&key_path).await)
                    {
                        info!(primary = %primary, "using cached certificate");
                        return Ok((cert, key));
                    }
                }
            }
        }

        info!(hosts = ?self.hosts, staging = self.settings.staging, "ordering certificate");
        let (cert_pem, key_pem) = self.issue().await?;

        fs::write(&cert_path, &cert_pem).await?;
        fs::write(&key_path, &key_pem).await?;
        let meta = CertMeta {
            issued_at: Utc::now(),
            hosts: self.hosts.clone(),
        };
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?).await?;

        Ok((cert_pem.into_bytes(), key_pem.into_bytes()))
    }

    async fn issue(&self) -> Result<(String, String), ExposeError> {
        let account = self.account().await?;

        let identifiers: Vec<Identifier> = self
            .hosts
            .iter()
            .map(|host| Identifier::Dns(host.clone()))
            .collect();
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| ExposeError::Acme(format!("order creation failed: {e}")))?;

        {
            let mut authorizations = order.authorizations();
            while let Some(authz) = authorizations.next().await {
                let mut authz = authz
                    .map_err(|e| ExposeError::Acme(format!("authorization failed: {e}")))?;

                match authz.status {
                    AuthorizationStatus::Valid => continue,
                    AuthorizationStatus::Pending => {}
                    other => {
                        return Err(ExposeError::Acme(format!(
                            "unexpected authorization status: {other:?}"
                        )))
                    }
                }

                let mut challenge = authz.challenge(ChallengeType::Http01).ok_or_else(|| {
                    ExposeError::Acme("HTTP-01 challenge not offered".to_string())
                })?;

                let key_auth = challenge.key_authorization().as_str().to_string();
                let token = challenge.token.clone();
                debug!(token = %token, "publishing HTTP-01 challenge");
                self.challenges.write().await.insert(token, key_auth);

                challenge
                    .set_ready()
                    .await
                    .map_err(|e| ExposeError::Acme(format!("challenge set-ready failed: {e}")))?;
            }
        }

        let retry = RetryPolicy::new()
            .timeout(std::time::Duration::from_secs(120))
            .initial_delay(std::time::Duration::from_secs(2));

        let status = order
            .poll_ready(&retry)
            .await
            .map_err(|e| ExposeError::Acme(format!("challenge verification failed: {e}")))?;
        match status {
            OrderStatus::Ready => {}
            other => {
                return Err(ExposeError::Acme(format!(
                    "order not ready for finalization: {other:?}"
                )))
            }
        }

        let key_pem = order
            .finalize()
            .await
            .map_err(|e| ExposeError::Acme(format!("finalization failed: {e}")))?;
        let cert_pem = order
            .poll_certificate(&retry)
            .await
            .map_err(|e| ExposeError::Acme(format!("certificate download failed: {e}")))?;

        self.challenges.write().await.clear();

        Ok((cert_pem, key_pem))
    }

    /// Load the cached ACME account or create one, agreeing to the CA's
    /// terms of service.
    async fn account(&self) -> Result<Account, ExposeError> {
        let account_path = self.settings.cache_dir.join("account.json");

        if let Ok(creds_json) = fs::read_to_string(&account_path).await {
            let creds: AccountCredentials = serde_json::from_str(&creds_json)
                .map_err(|e| ExposeError::Acme(format!("bad cached credentials: {e}")))?;
            let account = Account::builder()
                .map_err(|e| ExposeError::Acme(e.to_string()))?
                .from_credentials(creds)
                .await
                .map_err(|e| ExposeError::Acme(format!("account restore failed: {e}")))?;
            info!("ACME account loaded from cache");
            return Ok(account);
        }

        let directory_url = if self.settings.staging {
            LetsEncrypt::Staging.url().to_string()
        } else {
            LetsEncrypt::Production.url().to_string()
        };

        let (account, creds) = Account::builder()
            .map_err(|e| ExposeError::Acme(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", self.settings.contact_email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                directory_url,
                None,
            )
            .await
            .map_err(|e| ExposeError::Acme(format!("account creation failed: {e}")))?;

        let creds_json = serde_json::to_string_pretty(&creds)?;
        fs::write(&account_path, creds_json).await?;
        info!("ACME account created");

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(hosts: &[&str]) -> CertManager {
        CertManager::new(
            AcmeSettings {
                contact_email: "admin@example.com".to_string(),
                staging: true,
                cache_dir: PathBuf::from("certs"),
            },
            hosts.iter().map(|s| s.to_string()).collect(),
            Arc::new(RwLock::new(HashMap::new())),
        )
    }

    #[test]
    fn host_policy_restricts_to_configured_set() {
        let manager = manager(&["example.com", "other.io"]);
        assert!(manager.host_allowed("example.com"));
        assert!(manager.host_allowed("EXAMPLE.com"));
        assert!(!manager.host_allowed("evil.com"));
        assert!(!manager.host_allowed("sub.example.com"));
    }

    #[test]
    fn fresh_meta_does_not_need_renewal() {
        let meta = CertMeta {
            issued_at: Utc::now(),
            hosts: vec!["example.com".to_string()],
        };
        assert!(!meta.needs_renewal());
    }

    #[test]
    fn old_meta_needs_renewal() {
        let meta = CertMeta {
            issued_at: Utc::now() - chrono::Duration::days(61),
            hosts: vec!["example.com".to_string()],
        };
        assert!(meta.needs_renewal());
    }

    #[tokio::test]
    async fn load_without_hosts_fails() {
        let manager = manager(&[]);
        assert!(matches!(
            manager.load_or_issue().await,
            Err(ExposeError::NoAcmeHosts)
        ));
    }
}

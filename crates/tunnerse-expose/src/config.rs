//! `tunnerse.config` parsing.
//!
//! INI-like format with two sections. `[domains]` maps a host pattern to a
//! local port and is mandatory and non-empty; `[redirects]` lists hosts whose
//! plaintext requests are upgraded to HTTPS. Patterns may carry a `*.`
//! prefix, which matches the base host and any subdomain of it. Comments
//! start with `#`; unknown sections are ignored.

use std::path::Path;

use crate::ExposeError;

/// One `[domains]` line: requests for `host` are proxied to
/// `http://localhost:<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRule {
    pub host: String,
    pub port: u16,
}

/// Parsed front-door configuration.
#[derive(Debug, Clone, Default)]
pub struct ExposeConfig {
    pub domains: Vec<DomainRule>,
    pub redirects: Vec<String>,
}

impl ExposeConfig {
    pub async fn load(path: &Path) -> Result<Self, ExposeError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    pub fn parse(input: &str) -> Result<Self, ExposeError> {
        let mut config = ExposeConfig::default();
        let mut section = String::new();
        let mut domains_found = false;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_ascii_lowercase();
                if section == "domains" {
                    domains_found = true;
                }
                continue;
            }

            match section.as_str() {
                "domains" => {
                    let (host, port) = line
                        .split_once('=')
                        .ok_or_else(|| ExposeError::InvalidLine(line.to_string()))?;
                    let host = host.trim();
                    let port = port.trim();

                    if host.is_empty() {
                        return Err(ExposeError::InvalidLine(line.to_string()));
                    }
                    let port: u16 = port
                        .parse()
                        .map_err(|_| ExposeError::InvalidPort(port.to_string()))?;

                    config.domains.push(DomainRule {
                        host: host.to_ascii_lowercase(),
                        port,
                    });
                }
                "redirects" => {
                    config.redirects.push(line.to_ascii_lowercase());
                }
                _ => {} // unknown section
            }
        }

        if !domains_found {
            return Err(ExposeError::MissingDomains);
        }
        if config.domains.is_empty() {
            return Err(ExposeError::EmptyDomains);
        }

        Ok(config)
    }

    /// Local port for `host`, if some `[domains]` rule matches it.
    pub fn lookup_port(&self, host: &str) -> Option<u16> {
        self.domains
            .iter()
            .find(|rule| host_matches(&rule.host, host))
            .map(|rule| rule.port)
    }

    /// Whether a plaintext request for `host` should be 301'd to HTTPS.
    pub fn should_redirect(&self, host: &str) -> bool {
        self.redirects
            .iter()
            .any(|pattern| host_matches(pattern, host))
    }

    /// Hosts certificates can be issued for: every non-wildcard pattern plus
    /// the base of each wildcard (HTTP-01 cannot validate wildcards).
    pub fn acme_hosts(&self) -> Vec<String> {
        let mut hosts = Vec::new();
        for rule in &self.domains {
            let host = rule
                .host
                .strip_prefix("*.")
                .unwrap_or(&rule.host)
                .to_string();
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        hosts
    }
}

/// Wildcard-aware host comparison, case-insensitive. `*.base` matches `base`
/// itself and any `x.base`.
pub(crate) fn host_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => host == base || host.ends_with(&format!(".{base}")),
        None => host == pattern,
    }
}

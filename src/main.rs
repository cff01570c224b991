//! Tunnerse relay binary.
//!
//! Runs the tunnel relay's HTTP surface and, when a `tunnerse.config` file
//! is present, the TLS-terminating front door alongside it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunnerse_api::{RelayServer, RelayServerConfig};
use tunnerse_control::{RelayConfig, TunnelService};
use tunnerse_expose::{AcmeSettings, ExposeConfig, Exposer, ExposerConfig, TlsMode};

/// Tunnerse - public HTTP(S) tunneling relay
#[derive(Parser, Debug)]
#[command(name = "tunnerse")]
#[command(
    about = "Public HTTP(S) tunneling relay: expose behind-NAT services through a long-polling agent"
)]
#[command(version)]
struct Cli {
    /// Port for the relay's HTTP surface
    #[arg(long, env = "HTTP_PORT", default_value = "8081")]
    http_port: u16,

    /// Seconds a tunnel survives without a qualifying operation
    #[arg(long, env = "TUNNEL_INACTIVITY_LIFE_TIME", default_value = "60")]
    tunnel_inactivity_life_time: u64,

    /// Seconds a tunnel survives regardless of activity
    #[arg(long, env = "TUNNEL_LIFE_TIME", default_value = "600")]
    tunnel_life_time: u64,

    /// Seconds an external request may wait on the rendezvous
    #[arg(long, env = "TUNNEL_REQUEST_TIMEOUT", default_value = "10")]
    tunnel_request_timeout: u64,

    /// Maximum relayed request body, in bytes
    #[arg(long, env = "TUNNEL_MAX_BODY_BYTES", default_value = "10485760")]
    tunnel_max_body_bytes: usize,

    /// Derive tunnel identity from the Host header instead of the path
    #[arg(long, env = "SUBDOMAIN")]
    subdomain: bool,

    /// Render browser-facing errors as static HTML pages instead of JSON
    #[arg(long, env = "WARNS_ON_HTML")]
    warns_on_html: bool,

    /// Directory holding the static error pages
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Front-door configuration file; the exposer starts only if it exists
    #[arg(long, env = "EXPOSE_CONFIG", default_value = "tunnerse.config")]
    expose_config: PathBuf,

    /// Use ACME issuance instead of static certificate files
    #[arg(long, env = "ACME")]
    acme: bool,

    /// Contact email for the ACME account
    #[arg(long, env = "ACME_EMAIL", default_value = "admin@tunnerse.com")]
    acme_email: String,

    /// Use the ACME staging environment
    #[arg(long, env = "ACME_STAGING")]
    acme_staging: bool,

    /// Certificate cache and storage directory
    #[arg(long, env = "CERTS_DIR", default_value = "certs")]
    certs_dir: PathBuf,
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let core_config = RelayConfig {
        inactivity_ttl: Duration::from_secs(cli.tunnel_inactivity_life_time),
        max_ttl: Duration::from_secs(cli.tunnel_life_time),
        request_timeout: Duration::from_secs(cli.tunnel_request_timeout),
        subdomain: cli.subdomain,
        max_body_bytes: cli.tunnel_max_body_bytes,
        ..RelayConfig::default()
    };
    core_config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    info!(
        port = cli.http_port,
        subdomain = cli.subdomain,
        "tunnerse starting"
    );

    // Front door: only when its configuration file is present.
    if cli.expose_config.exists() {
        let routes = ExposeConfig::load(&cli.expose_config)
            .await
            .with_context(|| format!("error to load config: {}", cli.expose_config.display()))?;

        let tls = if cli.acme {
            TlsMode::Acme(AcmeSettings {
                contact_email: cli.acme_email.clone(),
                staging: cli.acme_staging,
                cache_dir: cli.certs_dir.clone(),
            })
        } else {
            TlsMode::Static {
                cert_path: cli.certs_dir.join("certificates/tunnerse.com.crt"),
                key_path: cli.certs_dir.join("certificates/tunnerse.com.key"),
            }
        };

        let exposer = Exposer::new(
            ExposerConfig {
                tls,
                ..ExposerConfig::default()
            },
            routes,
        );

        tokio::spawn(async move {
            if let Err(e) = exposer.start().await {
                error!(error = %e, "front-door exposer failed");
            }
        });
    } else {
        warn!(
            config = %cli.expose_config.display(),
            "no front-door config found, exposer disabled"
        );
    }

    let service = Arc::new(TunnelService::new(core_config));
    let bind_addr: SocketAddr = format!("0.0.0.0:{}", cli.http_port)
        .parse()
        .context("invalid HTTP_PORT")?;

    let server = RelayServer::new(
        RelayServerConfig {
            bind_addr,
            subdomain: cli.subdomain,
            warns_on_html: cli.warns_on_html,
            max_body_bytes: cli.tunnel_max_body_bytes,
            static_dir: cli.static_dir.clone(),
        },
        service,
    );

    let relay = tokio::spawn(server.start());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
        result = relay => {
            match result {
                Ok(Ok(())) => info!("relay stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "relay server error");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "relay task panicked");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

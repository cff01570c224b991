//! Tunnel registry and request/response correlation engine.
//!
//! The relay keeps every active tunnel in memory: a named entry pairing an
//! origin-side agent (long-polling for work) with external HTTP clients.
//! Each external request mints a correlation token, parks in a rendezvous
//! slot, and is matched against the agent's reply carrying the same token.
//! A per-tunnel supervisor task owns the inactivity and max-lifetime timers
//! and tears everything down without leaking tasks or slots.

mod config;
mod error;
mod naming;
mod registry;
mod service;
mod supervisor;
mod tunnel;

pub use config::RelayConfig;
pub use error::TunnelError;
pub use naming::{validate_base_name, validate_name};
pub use registry::TunnelRegistry;
pub use service::{InboundRequest, TunnelResponse, TunnelService};
pub use tunnel::Tunnel;

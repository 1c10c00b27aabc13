//! Request dispatch pipeline and rotation engine
//!
//! This module provides:
//! - the ingress proxy server (plain HTTP and CONNECT)
//! - the per-request dispatcher with retry/fallback
//! - the rotation selectors
//! - upstream transports (HTTP CONNECT, SOCKS)
//! - the health prober for demoted upstreams

pub mod dispatcher;
pub mod health;
pub mod rotation;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use dispatcher::{AccountingStore, DbAccountingStore, Dispatcher};
pub use health::{HealthProber, HealthProberConfig, HealthProberHandle};
pub use rotation::{build_selector, DynamicSelector, ProxySelector};
pub use server::ProxyServer;
pub use transport::ProxyTransport;
pub use tunnel::TunnelHandler;

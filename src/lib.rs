//! Rota - Rotating Forward Proxy
//!
//! Accepts client HTTP and CONNECT requests on one port and re-issues them
//! through a managed pool of upstream proxies, choosing a different upstream
//! per request according to a configurable rotation policy.
//!
//! ## Features
//!
//! - Rotation methods: round-robin, random, least-connections, rate-limited
//! - HTTP, HTTPS, SOCKS4, and SOCKS5 upstream support
//! - Per-attempt retry/fallback with unhealthy-proxy retirement
//! - Request accounting that feeds usage back into the rate-limited selector
//! - Health probing that restores demoted upstreams
//! - Admin REST API for the dashboard (PostgreSQL/TimescaleDB backed)

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;

pub use config::Config;
pub use database::Database;
pub use error::{Result, RotaError};

//! keygate-daemon - purchase webhook daemon library
//!
//! Hosts the HTTP transport and the durable adapters behind the core
//! reconciliation pipeline. The binary wires these together; integration
//! tests drive the router directly through this library.
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment fallbacks for secrets
//! - [`email`]: HTTP-API and SMTP delivery channels
//! - [`handlers`]: Webhook and health endpoints
//! - [`sqlite`]: SQLite-backed document store and identity provider

pub mod config;
pub mod email;
pub mod handlers;
pub mod sqlite;

//! A policy-routed DNS forwarder.
//!
//! Inbound queries arrive over UDP or DNS-over-HTTPS, get matched
//! against an ordered set of rules (literal domain patterns or geosite
//! category membership), and are forwarded to whichever upstream group
//! the matching rule names — over UDP, TCP, DNS-over-TLS, or
//! DNS-over-HTTPS, optionally through a SOCKS5 egress proxy.
//!
//! ```rust,no_run
//! use rustdns_forwarder::config::Config;
//! use rustdns_forwarder::geosite::GeositeStore;
//! use rustdns_forwarder::rules::RuleEngine;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(Path::new("appsettings.json"))?;
//! let geosite = GeositeStore::load(Path::new("geosite.dat"))?;
//! let _rules = RuleEngine::new(config.rules.clone(), geosite);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod geosite;
pub mod listeners;
pub mod rules;
pub mod util;
pub mod wire;

pub use crate::errors::ParseError;
pub use crate::wire::Message;

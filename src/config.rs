//! Loading and validating `appsettings.json`.
//!
//! What lives here is the schema and the validation that turns raw JSON
//! into a [`Config`] the rule engine and client cache can trust without
//! re-checking references at query time.

use crate::errors::ConfigError;
use crate::rules::{Pattern, Rule};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "SmartDnsConfig")]
    smart_dns_config: SmartDnsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartDnsConfig {
    #[serde(default)]
    proxy_servers: Vec<ProxyServerEntry>,
    dns_servers: Vec<DnsServerEntry>,
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyServerEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    proxy_address: String,
    proxy_port: u16,
    #[serde(default)]
    proxy_username: Option<String>,
    #[serde(default)]
    proxy_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DnsServerEntry {
    name: String,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    dnssec_validation: bool,
    forwarder_protocol: Transport,
    forwarder_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    domain: Vec<String>,
    #[serde(rename = "dnsServer")]
    dns_server: String,
}

/// Upstream transport protocol, shared by config and the client layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Https,
}

/// SOCKS5 egress proxy. `Socks5` is the only `type` this crate's schema
/// accepts; an unrecognised one fails config loading rather than being
/// silently dropped.
#[derive(Clone, Debug)]
pub struct ProxyRecord {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A named set of upstream DNS endpoints sharing a transport and an
/// optional egress proxy. Referenced by name from [`Rule`]s and from the
/// forwarder's client cache.
#[derive(Clone, Debug)]
pub struct UpstreamGroup {
    pub name: String,
    pub transport: Transport,
    pub addresses: Vec<String>,
    pub dnssec_validation: bool,
    pub proxy: Option<Arc<ProxyRecord>>,
}

/// The validated, ready-to-use configuration snapshot. Immutable after
/// load and shared by reference with every request handler
/// rather than a process-global singleton.
#[derive(Debug)]
pub struct Config {
    pub groups: HashMap<String, Arc<UpstreamGroup>>,
    pub rules: Vec<Rule>,
}

impl Config {
    /// Reads and validates `path`. Any dangling reference (a rule naming
    /// an unknown group, or a group naming an unknown proxy) is a fatal
    /// startup error, never a per-query one.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let file: ConfigFile = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        Config::from_file(file.smart_dns_config)
    }

    fn from_file(raw: SmartDnsConfig) -> Result<Config, ConfigError> {
        let mut proxies = HashMap::new();
        for p in raw.proxy_servers {
            if p.kind != "socks5" {
                return Err(ConfigError::UnsupportedProxyType {
                    proxy: p.name,
                    kind: p.kind,
                });
            }
            proxies.insert(
                p.name.clone(),
                Arc::new(ProxyRecord {
                    name: p.name,
                    address: p.proxy_address,
                    port: p.proxy_port,
                    username: p.proxy_username,
                    password: p.proxy_password,
                }),
            );
        }

        let mut groups = HashMap::new();
        for s in raw.dns_servers {
            if s.forwarder_addresses.is_empty() {
                return Err(ConfigError::EmptyGroup { group: s.name });
            }

            let proxy = match s.proxy {
                Some(ref name) => Some(proxies.get(name).cloned().ok_or_else(|| {
                    ConfigError::DanglingProxy {
                        group: s.name.clone(),
                        proxy: name.clone(),
                    }
                })?),
                None => None,
            };

            groups.insert(
                s.name.clone(),
                Arc::new(UpstreamGroup {
                    name: s.name,
                    transport: s.forwarder_protocol,
                    addresses: s.forwarder_addresses,
                    dnssec_validation: s.dnssec_validation,
                    proxy,
                }),
            );
        }

        let mut rules = Vec::with_capacity(raw.rules.len());
        for r in raw.rules {
            if !groups.contains_key(&r.dns_server) {
                return Err(ConfigError::DanglingRule {
                    rule: r.domain.join(","),
                    group: r.dns_server.clone(),
                });
            }

            let patterns = r.domain.iter().map(|p| Pattern::parse(p)).collect();
            rules.push(Rule {
                patterns,
                group: r.dns_server,
            });
        }

        Ok(Config { groups, rules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        Config::from_file(file.smart_dns_config)
    }

    #[test]
    fn an_unrecognised_proxy_type_is_a_fatal_config_error() {
        let err = parse(
            r#"{"SmartDnsConfig": {
                "proxyServers": [{"name": "p1", "type": "http", "proxyAddress": "10.0.0.1", "proxyPort": 8080}],
                "dnsServers": [],
                "rules": []
            }}"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::UnsupportedProxyType { .. }));
    }

    #[test]
    fn a_group_with_no_forwarder_addresses_is_rejected() {
        let err = parse(
            r#"{"SmartDnsConfig": {
                "dnsServers": [{"name": "g1", "forwarderProtocol": "Udp", "forwarderAddresses": []}],
                "rules": []
            }}"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::EmptyGroup { .. }));
    }

    #[test]
    fn a_rule_naming_an_unknown_group_is_rejected() {
        let err = parse(
            r#"{"SmartDnsConfig": {
                "dnsServers": [],
                "rules": [{"domain": ["example.com"], "dnsServer": "missing"}]
            }}"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::DanglingRule { .. }));
    }

    #[test]
    fn a_valid_config_loads_successfully() {
        let config = parse(
            r#"{"SmartDnsConfig": {
                "dnsServers": [{"name": "g1", "forwarderProtocol": "Udp", "forwarderAddresses": ["1.1.1.1"]}],
                "rules": [{"domain": ["example.com"], "dnsServer": "g1"}]
            }}"#,
        )
        .unwrap();

        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.rules.len(), 1);
    }
}

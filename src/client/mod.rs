//! Upstream DNS clients: one per {UDP, TCP, TLS, HTTPS}, sharing a single
//! fan-out/retry algorithm.
//!
//! The upstream transport is a small closed enumeration, so
//! [`UpstreamClient`] stores a concrete variant (tagged variants over
//! dynamic dispatch) rather than a `Box<dyn Transport>`; the retry loop
//! itself borrows the active variant as `&dyn Transport` only for the
//! duration of one `exchange` call, so the fan-out/retry code is
//! written once instead of four times.

pub mod cache;
pub(crate) mod framing;
pub mod https;
pub mod pool;
pub mod socks5;
pub mod tcp;
pub mod tls;
pub mod udp;

use crate::config::UpstreamGroup;
use crate::errors::TransportError;
use crate::wire::Message;
use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

const RETRIES: usize = 5;

/// A single upstream transport: UDP, TCP, TLS, or HTTPS.
#[async_trait]
pub trait Transport: Send + Sync {
    fn endpoint_count(&self) -> usize;
    fn endpoint_label(&self, idx: usize) -> String;
    fn attempt_timeout(&self) -> Duration;

    /// Sends `req` (an encoded DNS message) to endpoint `idx` and returns
    /// the raw response bytes. Implementations own their own
    /// connect/reuse policy (§4.2.2/§4.2.3); this method is one attempt,
    /// not a retry loop.
    async fn query(&self, idx: usize, req: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// The constructed client for one upstream group, cached by group name
/// by the client cache.
pub enum UpstreamClient {
    Udp(udp::UdpTransport),
    Tcp(tcp::TcpTransport),
    Tls(tls::TlsTransport),
    Https(https::HttpsTransport),
}

impl UpstreamClient {
    pub async fn new(
        group: &UpstreamGroup,
        pool: Arc<pool::UdpSocketPool>,
    ) -> Result<UpstreamClient, TransportError> {
        use crate::config::Transport as Protocol;

        Ok(match group.transport {
            Protocol::Udp => UpstreamClient::Udp(udp::UdpTransport::new(group, pool).await?),
            Protocol::Tcp => UpstreamClient::Tcp(tcp::TcpTransport::new(group).await?),
            Protocol::Tls => UpstreamClient::Tls(tls::TlsTransport::new(group).await?),
            Protocol::Https => UpstreamClient::Https(https::HttpsTransport::new(group)?),
        })
    }

    fn as_transport(&self) -> &dyn Transport {
        match self {
            UpstreamClient::Udp(t) => t,
            UpstreamClient::Tcp(t) => t,
            UpstreamClient::Tls(t) => t,
            UpstreamClient::Https(t) => t,
        }
    }

    /// Resolves `query` against this group: fan-out to every endpoint on
    /// each attempt, up to `RETRIES` retries, validating every candidate
    /// response before accepting it.
    pub async fn exchange(&self, group_name: &str, query: &Message) -> Result<Message, TransportError> {
        exchange(self.as_transport(), group_name, query).await
    }
}

/// One resolved upstream endpoint: the host as written in config (kept
/// around for TLS SNI) plus the address it resolved to.
#[derive(Clone, Debug)]
pub(crate) struct HostAddr {
    pub host: String,
    pub addr: std::net::SocketAddr,
}

/// Resolves each `host` or `host:port` entry in `addresses`, using
/// `default_port` when none is given. Plain IPv6 literals without
/// brackets aren't supported, matching what the config schema's
/// `forwarderAddresses` examples use in practice.
pub(crate) async fn resolve_endpoints(
    addresses: &[String],
    default_port: u16,
) -> Result<Vec<HostAddr>, TransportError> {
    let mut out = Vec::with_capacity(addresses.len());

    for addr in addresses {
        let (host, port) = match addr.rsplit_once(':') {
            Some((h, p)) if p.parse::<u16>().is_ok() => (h.to_string(), p.parse().unwrap()),
            _ => (addr.clone(), default_port),
        };
        let hostport = format!("{}:{}", host, port);

        let mut resolved = tokio::net::lookup_host(&hostport)
            .await
            .map_err(|source| TransportError::Io {
                endpoint: addr.clone(),
                source,
            })?;

        match resolved.next() {
            Some(sa) => out.push(HostAddr { host, addr: sa }),
            None => {
                return Err(TransportError::Connect {
                    endpoint: addr.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
                })
            }
        }
    }

    Ok(out)
}

async fn exchange(transport: &dyn Transport, group_name: &str, query: &Message) -> Result<Message, TransportError> {
    let req_bytes = query.to_vec().map_err(|source| TransportError::Io {
        endpoint: group_name.to_string(),
        source,
    })?;

    let per_attempt_timeout = transport.attempt_timeout();
    let mut attempted = 0;

    for _ in 0..=RETRIES {
        attempted += 1;

        let outcome = tokio::time::timeout(per_attempt_timeout, fan_out(transport, &req_bytes)).await;

        let bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(_)) | Err(_) => continue,
        };

        let response = match Message::from_slice(&bytes) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if !response.answers_query(query) {
            continue;
        }

        if !response.rcode.acceptable() {
            continue;
        }

        return Ok(response);
    }

    Err(TransportError::Exhausted {
        group: group_name.to_string(),
        attempted,
    })
}

/// Issues the query to every endpoint concurrently and returns the first
/// successful response; the rest are dropped (cancelled) once one wins.
async fn fan_out(transport: &dyn Transport, req: &[u8]) -> Result<Vec<u8>, TransportError> {
    let n = transport.endpoint_count();

    let mut attempts: FuturesUnordered<_> = (0..n).map(|idx| transport.query(idx, req)).collect();

    let mut last_err = None;
    while let Some(result) = attempts.next().await {
        match result {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or(TransportError::Exhausted {
        group: transport.endpoint_label(0),
        attempted: 0,
    }))
}

//! TCP upstream transport: one connection per endpoint, reused across
//! queries.

use crate::client::framing::{exchange_framed, BoxedStream};
use crate::client::{resolve_endpoints, socks5, HostAddr, Transport};
use crate::config::{ProxyRecord, UpstreamGroup};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct TcpTransport {
    endpoints: Vec<HostAddr>,
    conns: Vec<Mutex<Option<BoxedStream>>>,
    proxy: Option<Arc<ProxyRecord>>,
}

impl TcpTransport {
    pub async fn new(group: &UpstreamGroup) -> Result<TcpTransport, TransportError> {
        let endpoints = resolve_endpoints(&group.addresses, 53).await?;
        let conns = endpoints.iter().map(|_| Mutex::new(None)).collect();

        Ok(TcpTransport {
            endpoints,
            conns,
            proxy: group.proxy.clone(),
        })
    }

    /// Connects (optionally through SOCKS5) without any TLS handshake;
    /// shared with `TlsTransport`, which wraps the result in a TLS
    /// session before handing it back to the same framing/reuse logic.
    pub(crate) async fn connect_raw(
        endpoints: &[HostAddr],
        proxy: &Option<Arc<ProxyRecord>>,
        idx: usize,
    ) -> Result<BoxedStream, TransportError> {
        let endpoint = &endpoints[idx];
        let label = endpoint.addr.to_string();

        if let Some(proxy) = proxy {
            return socks5::tcp_connect(proxy, endpoint.addr)
                .await
                .map_err(|source| TransportError::Connect { endpoint: label, source });
        }

        let stream = TcpStream::connect(endpoint.addr)
            .await
            .map_err(|source| TransportError::Connect { endpoint: label, source })?;
        stream.set_nodelay(true).ok();

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn endpoint_label(&self, idx: usize) -> String {
        self.endpoints
            .get(idx)
            .map(|e| e.addr.to_string())
            .unwrap_or_default()
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn query(&self, idx: usize, req: &[u8]) -> Result<Vec<u8>, TransportError> {
        let label = self.endpoint_label(idx);
        let mut guard = self.conns[idx].lock().await;

        if guard.is_none() {
            *guard = Some(Self::connect_raw(&self.endpoints, &self.proxy, idx).await?);
        }

        let stream = guard.as_mut().unwrap();
        match exchange_framed(stream, req).await {
            Ok(bytes) => Ok(bytes),
            Err(source) => {
                // The connection is presumed broken; drop it so the next
                // query reconnects instead of reusing a dead stream.
                *guard = None;
                Err(TransportError::Io { endpoint: label, source })
            }
        }
    }
}

//! UDP upstream transport: pooled sockets, optional SOCKS5 UDP ASSOCIATE
//! egress.

use crate::client::pool::UdpSocketPool;
use crate::client::{resolve_endpoints, socks5, HostAddr, Transport};
use crate::config::{ProxyRecord, UpstreamGroup};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct UdpTransport {
    endpoints: Vec<HostAddr>,
    pool: Arc<UdpSocketPool>,
    proxy: Option<Arc<ProxyRecord>>,
}

impl UdpTransport {
    pub async fn new(group: &UpstreamGroup, pool: Arc<UdpSocketPool>) -> Result<UdpTransport, TransportError> {
        let endpoints = resolve_endpoints(&group.addresses, 53).await?;
        Ok(UdpTransport {
            endpoints,
            pool,
            proxy: group.proxy.clone(),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
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
        Duration::from_millis(2000)
    }

    async fn query(&self, idx: usize, req: &[u8]) -> Result<Vec<u8>, TransportError> {
        let dest = self.endpoints[idx].addr;
        let label = dest.to_string();

        if let Some(proxy) = &self.proxy {
            return socks5::udp_exchange(proxy, dest, req)
                .await
                .map_err(|reason| TransportError::Proxy {
                    endpoint: label,
                    reason,
                });
        }

        let lease = self
            .pool
            .acquire(dest)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: label.clone(),
                source,
            })?;

        lease
            .send_to(req, dest)
            .await
            .map_err(|source| TransportError::Io {
                endpoint: label.clone(),
                source,
            })?;

        let mut buf = [0u8; 4096];
        let (len, from) = lease
            .recv_from(&mut buf)
            .await
            .map_err(|source| TransportError::Io {
                endpoint: label.clone(),
                source,
            })?;

        if from != dest {
            return Err(TransportError::InvalidResponse {
                endpoint: label,
                reason: "reply from unexpected address".to_string(),
            });
        }

        Ok(buf[..len].to_vec())
    }
}

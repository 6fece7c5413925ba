//! DNS-over-TLS upstream transport. SNI is the endpoint's configured
//! host, and the certificate is verified against that host.

use crate::client::framing::{exchange_framed, BoxedStream};
use crate::client::tcp::TcpTransport;
use crate::client::{resolve_endpoints, HostAddr, Transport};
use crate::config::{ProxyRecord, UpstreamGroup};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::rustls::{ClientConfig, ServerName};
use tokio_rustls::TlsConnector;
use tokio::sync::Mutex;

pub struct TlsTransport {
    endpoints: Vec<HostAddr>,
    conns: Vec<Mutex<Option<BoxedStream>>>,
    proxy: Option<Arc<ProxyRecord>>,
    connector: TlsConnector,
}

impl TlsTransport {
    pub async fn new(group: &UpstreamGroup) -> Result<TlsTransport, TransportError> {
        let endpoints = resolve_endpoints(&group.addresses, 853).await?;
        let conns = endpoints.iter().map(|_| Mutex::new(None)).collect();

        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
            tokio_rustls::rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(TlsTransport {
            endpoints,
            conns,
            proxy: group.proxy.clone(),
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn connect(&self, idx: usize) -> Result<BoxedStream, TransportError> {
        let endpoint = &self.endpoints[idx];
        let label = endpoint.addr.to_string();

        let raw = TcpTransport::connect_raw(&self.endpoints, &self.proxy, idx).await?;

        let server_name = ServerName::try_from(endpoint.host.as_str()).map_err(|_| TransportError::Connect {
            endpoint: label.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid TLS server name"),
        })?;

        let tls = self
            .connector
            .connect(server_name, raw)
            .await
            .map_err(|source| TransportError::Connect { endpoint: label, source })?;

        Ok(Box::pin(tls))
    }
}

#[async_trait]
impl Transport for TlsTransport {
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
            *guard = Some(self.connect(idx).await?);
        }

        let stream = guard.as_mut().unwrap();
        match exchange_framed(stream, req).await {
            Ok(bytes) => Ok(bytes),
            Err(source) => {
                *guard = None;
                Err(TransportError::Io { endpoint: label, source })
            }
        }
    }
}

//! DNS-over-HTTPS upstream transport (RFC 8484).
//!
//! Always POSTs with `Content-Type: application/dns-message`; the GET
//! form belongs to the DoH *listener*, not the egress client.

use crate::client::mime::content_type_equal;
use crate::client::Transport;
use crate::config::UpstreamGroup;
use crate::errors::TransportError;
use async_trait::async_trait;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request};
use hyper::{Body, Client};
use hyper_alpn::AlpnConnector;
use std::io;
use std::time::Duration;
use url::Url;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

pub struct HttpsTransport {
    endpoints: Vec<Url>,
    client: Client<AlpnConnector>,
}

impl HttpsTransport {
    pub fn new(group: &UpstreamGroup) -> Result<HttpsTransport, TransportError> {
        let endpoints = group
            .addresses
            .iter()
            .map(|a| {
                if a.contains("://") {
                    Url::parse(a)
                } else {
                    Url::parse(&format!("https://{}/dns-query", a))
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::Connect {
                endpoint: group.name.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            })?;

        if group.proxy.is_some() {
            log::warn!(
                "group '{}' configures a SOCKS5 proxy but the HTTPS transport doesn't support proxied egress; ignoring",
                group.name
            );
        }

        let alpn = AlpnConnector::new();
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .http2_only(true)
            .build::<_, Body>(alpn);

        Ok(HttpsTransport { endpoints, client })
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn endpoint_label(&self, idx: usize) -> String {
        self.endpoints
            .get(idx)
            .map(|u| u.to_string())
            .unwrap_or_default()
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn query(&self, idx: usize, req: &[u8]) -> Result<Vec<u8>, TransportError> {
        let url = &self.endpoints[idx];
        let label = url.to_string();

        let request = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .body(Body::from(req.to_vec()))
            .map_err(|e| TransportError::Connect {
                endpoint: label.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            })?;

        let resp = self.client.request(request).await.map_err(|e| TransportError::Connect {
            endpoint: label.clone(),
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        })?;

        match resp.headers().get(CONTENT_TYPE) {
            Some(ct) if content_type_equal(ct, DNS_MESSAGE_CONTENT_TYPE) => {}
            Some(ct) => {
                return Err(TransportError::BadContentType {
                    endpoint: label,
                    content_type: format!("{:?}", ct),
                });
            }
            None => {
                return Err(TransportError::BadContentType {
                    endpoint: label,
                    content_type: "<missing>".to_string(),
                });
            }
        }

        if !resp.status().is_success() {
            return Err(TransportError::BadStatus {
                endpoint: label,
                status: resp.status().as_u16(),
            });
        }

        let body = hyper::body::to_bytes(resp.into_body()).await.map_err(|e| TransportError::Io {
            endpoint: label,
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        })?;

        Ok(body.to_vec())
    }
}

//! DoH/8125 listener: `/dns-query` over plain HTTP, GET-with-base64url
//! and POST-with-raw-body per RFC 8484. Built on `hyper`'s own server
//! primitives, kept to the one route this crate needs rather than
//! growing into a general web framework.

use crate::client::mime::content_type_equal;
use crate::forwarder::ForwarderService;
use http::header::{ACCEPT, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

pub async fn serve(
    addr: SocketAddr,
    service: Arc<ForwarderService>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(handle(req, service).await) }
            }))
        }
    });

    log::info!("DoH listener bound to {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            log::info!("DoH listener on {} shutting down", addr);
        })
        .await
}

async fn handle(req: Request<Body>, service: Arc<ForwarderService>) -> Response<Body> {
    if req.uri().path() != "/dns-query" {
        return status(StatusCode::NOT_FOUND);
    }

    let request_bytes = match *req.method() {
        Method::GET => match decode_get(&req) {
            Ok(bytes) => bytes,
            Err(resp) => return resp,
        },
        Method::POST => match decode_post(req).await {
            Ok(bytes) => bytes,
            Err(resp) => return resp,
        },
        _ => return status(StatusCode::METHOD_NOT_ALLOWED),
    };

    match service.forward(&request_bytes).await {
        Ok(response_bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .body(Body::from(response_bytes))
            .unwrap(),
        Err(()) => status(StatusCode::BAD_REQUEST),
    }
}

fn decode_get(req: &Request<Body>) -> Result<Vec<u8>, Response<Body>> {
    if let Some(accept) = req.headers().get(ACCEPT) {
        if !content_type_equal(accept, DNS_MESSAGE_CONTENT_TYPE) {
            return Err(status(StatusCode::BAD_REQUEST));
        }
    }

    let query = req.uri().query().unwrap_or("");
    let dns_param = query
        .split('&')
        .find_map(|kv| kv.strip_prefix("dns="))
        .ok_or_else(|| status(StatusCode::BAD_REQUEST))?;

    base64::decode_config(dns_param, base64::URL_SAFE_NO_PAD).map_err(|e| {
        log::debug!("malformed DoH GET 'dns' parameter: {}", e);
        status(StatusCode::BAD_REQUEST)
    })
}

async fn decode_post(req: Request<Body>) -> Result<Vec<u8>, Response<Body>> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .ok_or_else(|| status(StatusCode::UNSUPPORTED_MEDIA_TYPE))?;

    if !content_type_equal(content_type, DNS_MESSAGE_CONTENT_TYPE) {
        return Err(status(StatusCode::UNSUPPORTED_MEDIA_TYPE));
    }

    let body = hyper::body::to_bytes(req.into_body()).await.map_err(|e| {
        log::debug!("failed to read DoH POST body: {}", e);
        status(StatusCode::BAD_REQUEST)
    })?;

    Ok(body.to_vec())
}

fn status(code: StatusCode) -> Response<Body> {
    Response::builder().status(code).body(Body::empty()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_request(uri: &str, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_request(content_type: Option<&str>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri("/dns-query");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[test]
    fn decode_get_accepts_a_well_formed_dns_param() {
        let query = base64::encode_config(b"hello", base64::URL_SAFE_NO_PAD);
        let req = get_request(&format!("/dns-query?dns={}", query), None);
        assert_eq!(decode_get(&req).unwrap(), b"hello");
    }

    #[test]
    fn decode_get_accepts_a_matching_accept_header() {
        let query = base64::encode_config(b"hello", base64::URL_SAFE_NO_PAD);
        let req = get_request(&format!("/dns-query?dns={}", query), Some(DNS_MESSAGE_CONTENT_TYPE));
        assert_eq!(decode_get(&req).unwrap(), b"hello");
    }

    #[test]
    fn decode_get_rejects_a_mismatched_accept_header() {
        let query = base64::encode_config(b"hello", base64::URL_SAFE_NO_PAD);
        let req = get_request(&format!("/dns-query?dns={}", query), Some("text/plain"));
        let resp = decode_get(&req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn decode_get_rejects_a_missing_dns_param() {
        let req = get_request("/dns-query", None);
        let resp = decode_get(&req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn decode_get_rejects_invalid_base64() {
        let req = get_request("/dns-query?dns=not-valid-base64!!!", None);
        let resp = decode_get(&req).unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn decode_post_accepts_the_dns_message_content_type() {
        let req = post_request(Some(DNS_MESSAGE_CONTENT_TYPE), b"hello".to_vec());
        assert_eq!(decode_post(req).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn decode_post_rejects_a_mismatched_content_type() {
        let req = post_request(Some("text/plain"), b"hello".to_vec());
        let resp = decode_post(req).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn decode_post_rejects_a_missing_content_type() {
        let req = post_request(None, b"hello".to_vec());
        let resp = decode_post(req).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}

//! SOCKS5 egress (RFC 1928). Wraps the `fast-socks5` crate rather than
//! hand-rolling the handshake (see DESIGN.md).

use crate::client::framing::BoxedStream;
use crate::config::ProxyRecord;
use fast_socks5::client::{Config, Socks5Datagram, Socks5Stream};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

fn socks5_config() -> Config {
    let mut config = Config::default();
    config.set_connect_timeout(10);
    config
}

/// Opens a TCP connection to `dest` through `proxy`'s SOCKS5 CONNECT.
/// Used by the TCP and TLS transports before handing the stream off to
/// a raw exchange (TCP) or a TLS handshake (TLS).
pub async fn tcp_connect(proxy: &ProxyRecord, dest: SocketAddr) -> std::io::Result<BoxedStream> {
    let proxy_addr = format!("{}:{}", proxy.address, proxy.port);

    let stream: Socks5Stream<TcpStream> = match (&proxy.username, &proxy.password) {
        (Some(user), Some(pass)) => {
            Socks5Stream::connect_with_password(
                proxy_addr,
                dest.ip().to_string(),
                dest.port(),
                user.clone(),
                pass.clone(),
                socks5_config(),
            )
            .await
        }
        _ => Socks5Stream::connect(proxy_addr, dest.ip().to_string(), dest.port(), socks5_config()).await,
    }
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    Ok(Box::pin(stream))
}

/// Sends one UDP datagram to `dest` through `proxy`'s UDP ASSOCIATE and
/// returns the reply. The association is established and torn down per
/// query, since the socket pool's reuse story doesn't apply once
/// traffic is proxied.
pub async fn udp_exchange(proxy: &ProxyRecord, dest: SocketAddr, req: &[u8]) -> Result<Vec<u8>, String> {
    let proxy_addr = format!("{}:{}", proxy.address, proxy.port);

    let socks = match (&proxy.username, &proxy.password) {
        (Some(user), Some(pass)) => {
            Socks5Datagram::bind_with_password(proxy_addr, "0.0.0.0:0", user, pass).await
        }
        _ => Socks5Datagram::bind(proxy_addr, "0.0.0.0:0").await,
    }
    .map_err(|e| e.to_string())?;

    socks.send_to(req, dest).await.map_err(|e| e.to_string())?;

    let mut buf = [0u8; 4096];
    let (len, _from) = tokio::time::timeout(Duration::from_millis(2000), socks.recv_from(&mut buf))
        .await
        .map_err(|_| "timed out waiting for SOCKS5 UDP reply".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(buf[..len].to_vec())
}

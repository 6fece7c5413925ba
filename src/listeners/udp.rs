//! UDP/5383 listener. One socket, one task per datagram so a slow
//! `forward` never blocks the accept loop.

use crate::forwarder::ForwarderService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

const MAX_DATAGRAM: usize = 4096;

pub async fn serve(
    addr: SocketAddr,
    service: Arc<ForwarderService>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    log::info!("UDP listener bound to {}", addr);

    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            result = socket.recv_from(&mut buf) => result?,
            _ = shutdown.recv() => {
                log::info!("UDP listener on {} shutting down", addr);
                return Ok(());
            }
        };

        let request = buf[..len].to_vec();
        let service = service.clone();
        let socket = socket.clone();

        tokio::spawn(async move {
            match service.forward_udp(&request).await {
                Ok(response) => {
                    if let Err(e) = socket.send_to(&response, from).await {
                        log::warn!("failed to send UDP reply to {}: {}", from, e);
                    }
                }
                Err(()) => {
                    log::debug!("dropping unanswerable request from {}", from);
                }
            }
        });
    }
}

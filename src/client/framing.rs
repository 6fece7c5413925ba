//! RFC 1035 §4.2.2 two-byte length-prefix framing, shared by the TCP and
//! TLS transports.

use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A boxed, type-erased duplex stream. The TCP and TLS transports need
/// this because a connection may or may not be tunnelled through a
/// SOCKS5 proxy (`Socks5Stream<TcpStream>` vs. plain `TcpStream`, or
/// their TLS-wrapped equivalents) and both need to sit behind the same
/// per-endpoint connection slot.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

pub async fn exchange_framed<S>(stream: &mut S, req: &[u8]) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if req.len() > u16::MAX as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "message too large for TCP framing"));
    }

    stream.write_all(&(req.len() as u16).to_be_bytes()).await?;
    stream.write_all(req).await?;
    stream.flush().await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    Ok(buf)
}

//! UDP socket pool.
//!
//! A fixed-size pool of pre-bound sockets per address family, each with a
//! single in-use flag mutated by compare-and-swap. Leasing never blocks:
//! if every pooled socket is busy, a fresh ephemeral socket is allocated
//! and simply dropped (closed) once the exchange completes instead of
//! being returned to the pool.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

struct PooledSocket {
    socket: UdpSocket,
    in_use: AtomicBool,
}

/// Address family a destination belongs to, used to pick the right
/// half of the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &SocketAddr) -> Family {
        match addr {
            SocketAddr::V4(_) => Family::V4,
            SocketAddr::V6(_) => Family::V6,
        }
    }
}

pub struct UdpSocketPool {
    v4: Vec<PooledSocket>,
    v6: Vec<PooledSocket>,
}

impl UdpSocketPool {
    /// Pre-binds `size` sockets per address family to random high ports,
    /// skipping anything in `excluded_ports`. Source-port randomization
    /// is mandatory (§4.2.1): binding to port 0 and letting the OS choose
    /// already gives that, `excluded_ports` only needs to reject and retry.
    pub async fn new(size: usize, excluded_ports: &HashSet<u16>) -> std::io::Result<UdpSocketPool> {
        Ok(UdpSocketPool {
            v4: Self::bind_family(size, "0.0.0.0:0", excluded_ports).await?,
            v6: Self::bind_family(size, "[::]:0", excluded_ports).await?,
        })
    }

    async fn bind_family(
        size: usize,
        wildcard: &str,
        excluded_ports: &HashSet<u16>,
    ) -> std::io::Result<Vec<PooledSocket>> {
        let mut sockets = Vec::with_capacity(size);

        for _ in 0..size {
            loop {
                let socket = UdpSocket::bind(wildcard).await?;
                let port = socket.local_addr()?.port();
                if !excluded_ports.contains(&port) {
                    sockets.push(PooledSocket {
                        socket,
                        in_use: AtomicBool::new(false),
                    });
                    break;
                }
                // Excluded port: drop and rebind for a fresh random one.
            }
        }

        Ok(sockets)
    }

    /// Leases a socket suitable for sending to `dest`. Loopback
    /// destinations bypass the pool entirely (§4.2.1). Never blocks.
    pub async fn acquire(&self, dest: SocketAddr) -> std::io::Result<Lease<'_>> {
        if dest.ip().is_loopback() {
            return Ok(Lease::Fresh(Self::bind_fresh(dest).await?));
        }

        let half = match Family::of(&dest) {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        };

        for pooled in half {
            if pooled
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(Lease::Pooled(pooled));
            }
        }

        Ok(Lease::Fresh(Self::bind_fresh(dest).await?))
    }

    async fn bind_fresh(dest: SocketAddr) -> std::io::Result<UdpSocket> {
        let wildcard = match dest {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        UdpSocket::bind(wildcard).await
    }
}

/// A leased socket. Dropping a `Pooled` lease clears the in-use flag so
/// another caller can reuse the socket; dropping a `Fresh` lease just
/// closes it.
pub enum Lease<'a> {
    Pooled(&'a PooledSocket),
    Fresh(UdpSocket),
}

impl Deref for Lease<'_> {
    type Target = UdpSocket;

    fn deref(&self) -> &UdpSocket {
        match self {
            Lease::Pooled(p) => &p.socket,
            Lease::Fresh(s) => s,
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Lease::Pooled(p) = self {
            p.in_use.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_hands_out_the_same_socket_twice() {
        let pool = UdpSocketPool::new(2, &HashSet::new()).await.unwrap();
        let dest: SocketAddr = "93.184.216.34:53".parse().unwrap();

        let a = pool.acquire(dest).await.unwrap();
        let b = pool.acquire(dest).await.unwrap();

        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[tokio::test]
    async fn acquire_falls_back_to_a_fresh_socket_once_the_pool_is_exhausted() {
        let pool = UdpSocketPool::new(1, &HashSet::new()).await.unwrap();
        let dest: SocketAddr = "93.184.216.34:53".parse().unwrap();

        let _held = pool.acquire(dest).await.unwrap();
        let overflow = pool.acquire(dest).await.unwrap();

        assert!(matches!(overflow, Lease::Fresh(_)));
    }

    #[tokio::test]
    async fn releasing_a_lease_makes_the_socket_available_again() {
        let pool = UdpSocketPool::new(1, &HashSet::new()).await.unwrap();
        let dest: SocketAddr = "93.184.216.34:53".parse().unwrap();

        let first = pool.acquire(dest).await.unwrap();
        let first_addr = first.local_addr().unwrap();
        drop(first);

        let second = pool.acquire(dest).await.unwrap();
        assert_eq!(first_addr, second.local_addr().unwrap());
        assert!(matches!(second, Lease::Pooled(_)));
    }

    #[tokio::test]
    async fn loopback_destinations_bypass_the_pool() {
        let pool = UdpSocketPool::new(1, &HashSet::new()).await.unwrap();
        let dest: SocketAddr = "127.0.0.1:53".parse().unwrap();

        let lease = pool.acquire(dest).await.unwrap();
        assert!(matches!(lease, Lease::Fresh(_)));
    }
}

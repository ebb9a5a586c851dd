//! Thin async UDP transport used by the reactor.
//!
//! This crate knows how to move bytes over a socket and nothing about the
//! timing protocol itself; packet framing and semantics live entirely in
//! `cofetcher-proto`.

use std::io;
use std::net::SocketAddr;

use cofetcher_proto::WIRE_LEN;
use tokio::net::UdpSocket as TokioUdpSocket;
use tracing::debug;

/// A bound UDP socket specialised to the fixed-size packets this protocol
/// exchanges.
#[derive(Debug)]
pub struct Socket {
    inner: TokioUdpSocket,
}

impl Socket {
    /// Bind a new socket to `0.0.0.0:port`.
    pub async fn bind(port: u16) -> io::Result<Socket> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let inner = TokioUdpSocket::bind(addr).await?;
        Ok(Socket { inner })
    }

    /// Wait for the next datagram. The returned buffer is always exactly
    /// as long as the bytes received (which may differ from [`WIRE_LEN`] —
    /// callers decode and drop malformed datagrams themselves).
    pub async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        // one datagram is never larger than this; anything bigger than a
        // valid packet is malformed anyway and will be rejected downstream.
        let mut buf = [0u8; 512];
        let (len, peer) = self.inner.recv_from(&mut buf).await?;
        if len != WIRE_LEN {
            debug!(peer = %peer, len, "received a datagram of unexpected length");
        }
        Ok((buf[..len].to_vec(), peer))
    }

    /// Send `bytes` to `peer`, blocking the calling task until the send
    /// completes (or fails). The reactor uses this for the latency-sensitive
    /// state-1 reply; other sends may be spawned onto a background task.
    pub async fn send_to(&self, bytes: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(bytes, peer).await
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_datagram() {
        let a = Socket::bind(0).await.unwrap();
        let b = Socket::bind(0).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(&[1, 2, 3], b_addr).await.unwrap();
        let (bytes, _peer) = b.recv_from().await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}

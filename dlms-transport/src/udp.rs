//! UDP transport implementation
//!
//! Each `write` call sends exactly one datagram. Reads are served from the
//! most recently received datagram until it is drained, then the next one
//! is awaited.

use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected, with_timeout};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use dlms_core::{DlmsError, DlmsResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Maximum UDP payload size
pub const MAX_UDP_PAYLOAD_SIZE: usize = 65507;

/// UDP transport layer settings
#[derive(Debug, Clone)]
pub struct UdpSettings {
    pub remote_address: SocketAddr,
    pub local_address: SocketAddr,
    pub timeout: Option<Duration>,
}

impl UdpSettings {
    pub fn new(remote_address: SocketAddr) -> Self {
        Self {
            remote_address,
            local_address: SocketAddr::from(([0, 0, 0, 0], 0)),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_timeout(remote_address: SocketAddr, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(remote_address)
        }
    }
}

/// UDP transport layer implementation
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    settings: UdpSettings,
    datagram: BytesMut,
}

impl UdpTransport {
    pub fn new(settings: UdpSettings) -> Self {
        Self {
            socket: None,
            settings,
            datagram: BytesMut::new(),
        }
    }

    /// Create UDP transport from address string
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| DlmsError::Configuration(format!("Invalid UDP address: {}", e)))?;
        Ok(Self::new(UdpSettings::new(addr)))
    }

    pub fn local_addr(&self) -> DlmsResult<SocketAddr> {
        let socket = self.socket.as_ref().ok_or_else(|| not_connected("UDP socket"))?;
        Ok(socket.local_addr()?)
    }

    async fn receive_datagram(&mut self) -> DlmsResult<()> {
        let socket = self.socket.as_ref().ok_or_else(|| not_connected("UDP socket"))?;
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD_SIZE];
        let len = with_timeout(self.settings.timeout, socket.recv(&mut buf)).await?;
        self.datagram.clear();
        self.datagram.extend_from_slice(&buf[..len]);
        Ok(())
    }
}

#[async_trait]
impl TransportLayer for UdpTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.socket.is_some() {
            return Err(already_open());
        }
        let socket = UdpSocket::bind(self.settings.local_address).await?;
        // connected sockets only deliver datagrams from the remote address
        socket.connect(self.settings.remote_address).await?;
        self.socket = Some(socket);
        self.datagram.clear();
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for UdpTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> DlmsResult<()> {
        self.settings.timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.datagram.is_empty() {
            self.receive_datagram().await?;
        }
        let n = buf.len().min(self.datagram.len());
        buf[..n].copy_from_slice(&self.datagram[..n]);
        self.datagram.advance(n);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize> {
        if buf.len() > MAX_UDP_PAYLOAD_SIZE {
            return Err(DlmsError::PayloadTooLarge {
                size: buf.len(),
                max: MAX_UDP_PAYLOAD_SIZE,
            });
        }
        let socket = self.socket.as_ref().ok_or_else(|| not_connected("UDP socket"))?;
        with_timeout(self.settings.timeout, socket.send(buf)).await
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.socket.is_none()
    }

    async fn close(&mut self) -> DlmsResult<()> {
        self.socket = None;
        self.datagram.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_settings() {
        let addr: SocketAddr = "127.0.0.1:4059".parse().unwrap();
        let settings = UdpSettings::with_timeout(addr, Duration::from_secs(5));
        assert_eq!(settings.remote_address, addr);
        assert_eq!(settings.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_datagram_is_read_in_pieces() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut transport = UdpTransport::new(UdpSettings::with_timeout(peer_addr, Duration::from_secs(2)));
        transport.open().await.unwrap();
        assert!(transport.local_addr().unwrap().port() != 0);

        transport.write_all(&[0xAA, 0xBB]).await.unwrap();
        let mut buf = [0u8; 8];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);

        peer.send_to(&[1, 2, 3, 4, 5], from).await.unwrap();
        let mut head = [0u8; 2];
        transport.read_exact(&mut head).await.unwrap();
        assert_eq!(head, [1, 2]);
        let mut tail = [0u8; 3];
        transport.read_exact(&mut tail).await.unwrap();
        assert_eq!(tail, [3, 4, 5]);
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut transport = UdpTransport::new(UdpSettings::new(addr));
        let big = vec![0u8; MAX_UDP_PAYLOAD_SIZE + 1];
        assert!(matches!(
            transport.write(&big).await,
            Err(DlmsError::PayloadTooLarge { .. })
        ));
    }
}

//! TCP transport implementation

use crate::io::IoTransport;
use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected, with_timeout};
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings with a 30 second timeout
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_timeout(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            address,
            timeout: Some(timeout),
        }
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    inner: Option<IoTransport<TcpStream>>,
    settings: TcpSettings,
}

impl TcpTransport {
    /// Create a new, unopened TCP transport
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            inner: None,
            settings,
        }
    }

    /// Create TCP transport from an address string such as `"10.0.0.7:4059"`
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| DlmsError::Configuration(format!("Invalid TCP address: {}", e)))?;
        Ok(Self::new(TcpSettings::new(addr)))
    }

    /// Wrap an accepted socket (server side)
    ///
    /// # Arguments
    /// * `stream` - The already-connected TCP stream
    /// * `timeout` - Optional read/write timeout
    pub fn from_connected_stream(stream: TcpStream, timeout: Option<Duration>) -> Self {
        let address = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self {
            inner: Some(IoTransport::with_timeout(stream, timeout)),
            settings: TcpSettings { address, timeout },
        }
    }

    /// Remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.settings.address
    }

    fn stream(&mut self) -> DlmsResult<&mut IoTransport<TcpStream>> {
        self.inner.as_mut().ok_or_else(|| not_connected("TCP stream"))
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.inner.as_ref().is_some_and(|s| !s.is_closed()) {
            return Err(already_open());
        }
        let stream = with_timeout(self.settings.timeout, TcpStream::connect(self.settings.address)).await?;
        stream.set_nodelay(true)?;
        self.inner = Some(IoTransport::with_timeout(stream, self.settings.timeout));
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> DlmsResult<()> {
        self.settings.timeout = timeout;
        if let Some(inner) = self.inner.as_mut() {
            inner.set_timeout(timeout).await?;
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        self.stream()?.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize> {
        self.stream()?.write(buf).await
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.stream()?.flush().await
    }

    fn is_closed(&self) -> bool {
        self.inner.as_ref().is_none_or(|s| s.is_closed())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.inner.take() {
            stream.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_settings() {
        let addr: SocketAddr = "127.0.0.1:4059".parse().unwrap();
        let settings = TcpSettings::new(addr);
        assert_eq!(settings.address, addr);
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_bad_address_is_configuration_error() {
        let err = TcpTransport::from_address("not-an-address").unwrap_err();
        assert!(err.is_local_fault());
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut transport = TcpTransport::from_connected_stream(socket, None);
            let mut buf = [0u8; 3];
            transport.read_exact(&mut buf).await.unwrap();
            transport.write_all(&buf).await.unwrap();
        });

        let mut client = TcpTransport::new(TcpSettings::with_timeout(addr, Duration::from_secs(2)));
        assert!(client.is_closed());
        client.open().await.unwrap();
        client.write_all(b"abc").await.unwrap();
        let mut echo = [0u8; 3];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"abc");
        server.await.unwrap();

        client.close().await.unwrap();
        assert!(client.is_closed());
    }
}

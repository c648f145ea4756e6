//! Transport over any tokio byte stream
//!
//! [`IoTransport`] adapts an `AsyncRead + AsyncWrite` value (an accepted
//! socket, a serial port, an in-memory duplex pipe) to [`StreamAccessor`].
//! The TCP and serial transports are built on it.

use crate::stream::{StreamAccessor, TransportLayer, with_timeout};
use async_trait::async_trait;
use dlms_core::DlmsResult;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug)]
pub struct IoTransport<S> {
    stream: S,
    timeout: Option<Duration>,
    closed: bool,
}

impl<S> IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            timeout: None,
            closed: false,
        }
    }

    pub fn with_timeout(stream: S, timeout: Option<Duration>) -> Self {
        Self {
            stream,
            timeout,
            closed: false,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl<S> StreamAccessor for IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> DlmsResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        match with_timeout(self.timeout, self.stream.read(buf)).await {
            Ok(0) if !buf.is_empty() => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                if !matches!(e, dlms_core::DlmsError::Timeout) {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize> {
        with_timeout(self.timeout, self.stream.write(buf)).await
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        with_timeout(self.timeout, self.stream.flush()).await
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
        Ok(())
    }
}

/// An already-established stream is open from the start
#[async_trait]
impl<S> TransportLayer for IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn open(&mut self) -> DlmsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_core::DlmsError;

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = IoTransport::new(a);
        let mut right = IoTransport::new(b);

        left.write_all(&[1, 2, 3, 4]).await.unwrap();
        left.flush().await.unwrap();

        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (a, b) = tokio::io::duplex(64);
        let mut right = IoTransport::new(b);
        drop(a);

        let mut buf = [0u8; 2];
        let result = right.read_exact(&mut buf).await;
        assert!(matches!(result, Err(DlmsError::ConnectionClosed)));
        assert!(right.is_closed());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (_a, b) = tokio::io::duplex(64);
        let mut right = IoTransport::with_timeout(b, Some(Duration::from_millis(20)));
        let mut buf = [0u8; 1];
        assert!(matches!(right.read(&mut buf).await, Err(DlmsError::Timeout)));
        assert!(!right.is_closed());
    }
}

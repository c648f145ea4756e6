//! Stream accessor trait for transport layer

use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use std::future::Future;
use std::time::Duration;

/// Stream accessor interface to access a physical stream to a remote peer
#[async_trait]
pub trait StreamAccessor: Send {
    /// Set the read timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> DlmsResult<()>;

    /// Read data from the stream
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if the peer closed the stream
    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize>;

    /// Fill `buf` completely
    ///
    /// A stream that ends before `buf` is full yields `ConnectionClosed`.
    async fn read_exact(&mut self, mut buf: &mut [u8]) -> DlmsResult<()> {
        while !buf.is_empty() {
            let n = self.read(buf).await?;
            if n == 0 {
                return Err(DlmsError::ConnectionClosed);
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Read a single byte
    async fn read_u8(&mut self) -> DlmsResult<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    /// Write data to the stream
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> DlmsResult<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> DlmsResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(DlmsError::Connection(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> DlmsResult<()>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream
    async fn close(&mut self) -> DlmsResult<()>;
}

/// Transport layer trait that extends StreamAccessor
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    /// Open the physical layer connection
    async fn open(&mut self) -> DlmsResult<()>;
}

/// Run an I/O future, bounded by `timeout` when one is set
pub(crate) async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> DlmsResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DlmsError::Timeout)?
            .map_err(DlmsError::Connection),
        None => fut.await.map_err(DlmsError::Connection),
    }
}

pub(crate) fn not_connected(what: &str) -> DlmsError {
    DlmsError::Connection(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("{} not connected", what),
    ))
}

pub(crate) fn already_open() -> DlmsError {
    DlmsError::Connection(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "Connection has already been opened",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let never = std::future::pending::<std::io::Result<()>>();
        let result = with_timeout(Some(Duration::from_millis(10)), never).await;
        assert!(matches!(result, Err(DlmsError::Timeout)));
    }

    #[tokio::test]
    async fn test_with_timeout_maps_io_error() {
        let failing = async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        };
        let result = with_timeout(None, failing).await;
        assert!(matches!(result, Err(DlmsError::Connection(_))));
    }
}

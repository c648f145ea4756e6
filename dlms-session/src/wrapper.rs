//! Wrapper session layer for DLMS/COSEM
//!
//! Used over TCP and UDP. Every PDU is preceded by an eight byte header:
//!
//! ```text
//! version (u16 = 1) | source wport (u16) | destination wport (u16) | length (u16)
//! ```
//!
//! All fields are big-endian.

use crate::layer::SessionLayer;
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use dlms_transport::StreamAccessor;
use log::{trace, warn};

/// Wrapper header length
pub const WRAPPER_HEADER_LENGTH: usize = 8;

/// The only wrapper version this stack speaks
pub const WRAPPER_VERSION: u16 = 1;

/// Largest payload the 16-bit length field can describe
pub const MAX_WRAPPER_PAYLOAD: usize = u16::MAX as usize;

/// Wrapper header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    source_port: u16,
    destination_port: u16,
    payload_length: u16,
}

impl WrapperHeader {
    pub fn new(source_port: u16, destination_port: u16, payload_length: u16) -> Self {
        Self {
            source_port,
            destination_port,
            payload_length,
        }
    }

    /// Header describing `payload`
    ///
    /// # Errors
    /// `PayloadTooLarge` if the payload does not fit the length field.
    pub fn for_payload(source_port: u16, destination_port: u16, payload: &[u8]) -> DlmsResult<Self> {
        let payload_length = u16::try_from(payload.len()).map_err(|_| DlmsError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_WRAPPER_PAYLOAD,
        })?;
        Ok(Self::new(source_port, destination_port, payload_length))
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    pub fn payload_length(&self) -> usize {
        usize::from(self.payload_length)
    }

    pub fn encode(&self) -> [u8; WRAPPER_HEADER_LENGTH] {
        let mut out = [0u8; WRAPPER_HEADER_LENGTH];
        out[0..2].copy_from_slice(&WRAPPER_VERSION.to_be_bytes());
        out[2..4].copy_from_slice(&self.source_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.destination_port.to_be_bytes());
        out[6..8].copy_from_slice(&self.payload_length.to_be_bytes());
        out
    }

    /// Decode a header from the first eight bytes of `data`
    ///
    /// # Errors
    /// `UnsupportedVersion` for any version other than 1. This is fatal:
    /// the peer speaks an incompatible revision.
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let header: &[u8; WRAPPER_HEADER_LENGTH] = data
            .get(..WRAPPER_HEADER_LENGTH)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                DlmsError::FrameInvalid(format!(
                    "Wrapper header too short: expected {}, got {}",
                    WRAPPER_HEADER_LENGTH,
                    data.len()
                ))
            })?;

        let field = |i: usize| u16::from_be_bytes([header[i], header[i + 1]]);
        let version = field(0);
        if version != WRAPPER_VERSION {
            return Err(DlmsError::UnsupportedVersion(version));
        }
        Ok(Self::new(field(2), field(4), field(6)))
    }

    /// Read exactly one header from a stream
    pub async fn read_from<S>(stream: &mut S) -> DlmsResult<Self>
    where
        S: StreamAccessor + ?Sized,
    {
        let mut buf = [0u8; WRAPPER_HEADER_LENGTH];
        stream.read_exact(&mut buf).await?;
        Self::decode(&buf)
    }
}

/// Header and payload of one wrapper frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperPdu {
    pub header: WrapperHeader,
    pub payload: Vec<u8>,
}

impl WrapperPdu {
    pub fn new(source_port: u16, destination_port: u16, payload: Vec<u8>) -> DlmsResult<Self> {
        let header = WrapperHeader::for_payload(source_port, destination_port, &payload)?;
        Ok(Self { header, payload })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WRAPPER_HEADER_LENGTH + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one complete frame
    ///
    /// The buffer must hold exactly the declared number of payload bytes.
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let header = WrapperHeader::decode(data)?;
        let actual = data.len() - WRAPPER_HEADER_LENGTH;
        if actual != header.payload_length() {
            return Err(DlmsError::LengthMismatch {
                declared: header.payload_length(),
                actual,
            });
        }
        Ok(Self {
            header,
            payload: data[WRAPPER_HEADER_LENGTH..].to_vec(),
        })
    }

    /// Read a header and then exactly its payload from a stream
    pub async fn read_from<S>(stream: &mut S) -> DlmsResult<Self>
    where
        S: StreamAccessor + ?Sized,
    {
        let header = WrapperHeader::read_from(stream).await?;
        let mut payload = vec![0u8; header.payload_length()];
        stream.read_exact(&mut payload).await?;
        Ok(Self { header, payload })
    }
}

/// Encode a complete wrapper frame
pub fn encode(source_port: u16, destination_port: u16, payload: &[u8]) -> DlmsResult<Vec<u8>> {
    let header = WrapperHeader::for_payload(source_port, destination_port, payload)?;
    let mut out = Vec::with_capacity(WRAPPER_HEADER_LENGTH + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Wrapper session over a stream or datagram transport
///
/// A client session knows both ports up front. A server session learns
/// them from the first frame it receives and answers with the ports
/// swapped; a later frame with different ports is a fatal framing error.
#[derive(Debug)]
pub struct WrapperSession<T: StreamAccessor> {
    transport: T,
    local_port: Option<u16>,
    remote_port: Option<u16>,
    is_server: bool,
}

impl<T: StreamAccessor> WrapperSession<T> {
    /// Client session sending from `client_port` to logical device `server_port`
    pub fn client(transport: T, client_port: u16, server_port: u16) -> Self {
        Self {
            transport,
            local_port: Some(client_port),
            remote_port: Some(server_port),
            is_server: false,
        }
    }

    /// Server session that learns its ports from the client
    pub fn server(transport: T) -> Self {
        Self {
            transport,
            local_port: None,
            remote_port: None,
            is_server: true,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn check_ports(&mut self, header: &WrapperHeader) -> DlmsResult<()> {
        let (src, dst) = (header.source_port(), header.destination_port());
        match (self.remote_port, self.local_port) {
            (None, _) | (_, None) => {
                self.remote_port = Some(src);
                self.local_port = Some(dst);
                Ok(())
            }
            (Some(remote), Some(local)) if remote == src && local == dst => Ok(()),
            (Some(remote), Some(local)) => {
                warn!(
                    "Wrapper frame for {} -> {} on session {} -> {}",
                    src, dst, remote, local
                );
                Err(DlmsError::FrameInvalid(format!(
                    "Unexpected wrapper ports {} -> {}",
                    src, dst
                )))
            }
        }
    }
}

#[async_trait]
impl<T: StreamAccessor> SessionLayer for WrapperSession<T> {
    async fn send(&mut self, pdu: &[u8]) -> DlmsResult<()> {
        let (Some(local), Some(remote)) = (self.local_port, self.remote_port) else {
            return Err(DlmsError::Protocol(
                "Wrapper ports unknown before the first request".to_string(),
            ));
        };
        let frame = encode(local, remote, pdu)?;
        trace!("Wrapper send {} -> {} ({} bytes)", local, remote, pdu.len());
        self.transport.write_all(&frame).await?;
        self.transport.flush().await
    }

    async fn receive(&mut self) -> DlmsResult<Vec<u8>> {
        let frame = WrapperPdu::read_from(&mut self.transport).await?;
        self.check_ports(&frame.header)?;
        trace!(
            "Wrapper recv {} -> {} ({} bytes)",
            frame.header.source_port(),
            frame.header.destination_port(),
            frame.payload.len()
        );
        Ok(frame.payload)
    }

    async fn close(&mut self) -> DlmsResult<()> {
        self.transport.close().await
    }

    fn client_id(&self) -> Option<u16> {
        if self.is_server { self.remote_port } else { self.local_port }
    }

    fn logical_device_id(&self) -> Option<u16> {
        if self.is_server { self.local_port } else { self.remote_port }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_transport::IoTransport;
    use tokio_test::io::Builder;

    #[test]
    fn test_header_layout() {
        let header = WrapperHeader::new(0x0010, 0x0001, 0x001F);
        assert_eq!(header.encode(), [0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x1F]);
        assert_eq!(WrapperHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_wrong_version_is_fatal() {
        let data = [0x00, 0x02, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00];
        assert!(matches!(
            WrapperHeader::decode(&data),
            Err(DlmsError::UnsupportedVersion(2))
        ));
        // byte-swapped version 1 is not accepted either
        let swapped = [0x01, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00, 0x00];
        assert!(matches!(
            WrapperHeader::decode(&swapped),
            Err(DlmsError::UnsupportedVersion(0x0100))
        ));
    }

    #[test]
    fn test_payload_limits() {
        let max = vec![0xAB; MAX_WRAPPER_PAYLOAD];
        let frame = encode(1, 2, &max).unwrap();
        let pdu = WrapperPdu::decode(&frame).unwrap();
        assert_eq!(pdu.payload.len(), MAX_WRAPPER_PAYLOAD);

        let empty = WrapperPdu::decode(&encode(1, 2, &[]).unwrap()).unwrap();
        assert!(empty.payload.is_empty());

        let too_big = vec![0u8; MAX_WRAPPER_PAYLOAD + 1];
        assert!(matches!(
            encode(1, 2, &too_big),
            Err(DlmsError::PayloadTooLarge { size: 65536, .. })
        ));
    }

    #[test]
    fn test_declared_length_must_match() {
        let mut frame = encode(0x10, 0x01, &[1, 2, 3]).unwrap();
        frame.push(4);
        assert!(matches!(
            WrapperPdu::decode(&frame),
            Err(DlmsError::LengthMismatch { declared: 3, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_server_learns_and_swaps_ports() {
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x02])
            .read(&[0xC0, 0x01])
            .write(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0xC4])
            .build();
        let mut session = WrapperSession::server(IoTransport::new(mock));
        assert_eq!(session.client_id(), None);

        assert_eq!(session.receive().await.unwrap(), vec![0xC0, 0x01]);
        assert_eq!(session.client_id(), Some(0x10));
        assert_eq!(session.logical_device_id(), Some(0x01));
        session.send(&[0xC4]).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_port_change() {
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x01, 0xAA])
            .read(&[0x00, 0x01, 0x00, 0x20, 0x00, 0x01, 0x00, 0x01, 0xBB])
            .build();
        let mut session = WrapperSession::server(IoTransport::new(mock));
        session.receive().await.unwrap();
        assert!(matches!(session.receive().await, Err(DlmsError::FrameInvalid(_))));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_transport_fault() {
        let mock = Builder::new()
            .read(&[0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x00, 0x05, 0x01, 0x02])
            .build();
        let mut session = WrapperSession::server(IoTransport::new(mock));
        assert!(matches!(session.receive().await, Err(DlmsError::ConnectionClosed)));
    }
}

//! Common interface of the Wrapper and HDLC session layers

use async_trait::async_trait;
use dlms_core::DlmsResult;

/// A session layer carries complete COSEM PDUs over a transport
///
/// `receive` always yields one whole PDU: segmented HDLC transfers are
/// reassembled and wrapper payloads are read to their declared length.
#[async_trait]
pub trait SessionLayer: Send {
    async fn send(&mut self, pdu: &[u8]) -> DlmsResult<()>;

    async fn receive(&mut self) -> DlmsResult<Vec<u8>>;

    /// Release the link and close the underlying transport
    async fn close(&mut self) -> DlmsResult<()>;

    /// Client identity on the link (wrapper source port or HDLC client address)
    ///
    /// `None` until the server side has seen the first frame.
    fn client_id(&self) -> Option<u16>;

    /// Logical device addressed by the client
    fn logical_device_id(&self) -> Option<u16>;
}

/// Which session layer carries the PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionKind {
    #[default]
    Wrapper,
    Hdlc,
}

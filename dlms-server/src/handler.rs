//! Extension points for the embedding application
//!
//! Both traits are injected when the listener is built and called
//! synchronously from the connection worker.

use async_trait::async_trait;
use dlms_application::{Association, ConnectionInfo, ExceptionResponse};
use dlms_core::DlmsResult;

/// Serves the xDLMS requests of an established association
///
/// `request` is already deciphered; the returned response is ciphered by
/// the worker when the context requires it.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, association: &Association, request: &[u8]) -> DlmsResult<Vec<u8>>;
}

/// Answers every request with `service-not-supported`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedServiceHandler;

#[async_trait]
impl RequestHandler for UnsupportedServiceHandler {
    async fn handle_request(&self, association: &Association, request: &[u8]) -> DlmsResult<Vec<u8>> {
        log::debug!(
            "Connection {}: no handler for APDU 0x{:02X}",
            association.connection_id,
            request.first().copied().unwrap_or_default()
        );
        Ok(ExceptionResponse::service_not_supported().encode())
    }
}

/// Observer of connection status and request traffic
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionListener: Send + Sync {
    /// Called when a connection opens and again when it closes
    fn connection_changed(&self, info: &ConnectionInfo);

    /// Called with every deciphered request before it reaches the handler
    fn before_dispatch(&self, _connection_id: u64, _request: &[u8]) {}
}

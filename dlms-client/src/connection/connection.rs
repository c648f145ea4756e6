//! Client connection to a DLMS/COSEM server
//!
//! # Architecture
//!
//! A connection stacks three layers that are opened in order and torn down
//! in reverse:
//! - **Transport Layer**: TCP, UDP, or Serial communication
//! - **Session Layer**: HDLC or Wrapper protocol
//! - **Application Layer**: the association (AARQ/AARE, HLS, ciphering)
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use dlms_client::ConnectionBuilder;
//!
//! # async fn run() -> dlms_core::DlmsResult<()> {
//! let mut conn = ConnectionBuilder::new().tcp("192.168.1.100:4059").build()?;
//! conn.open().await?;
//! let response = conn.send_request(&[0xC0, 0x01, 0xC1, 0x00, 0x08]).await?;
//! conn.release().await?;
//! # Ok(())
//! # }
//! ```

use super::builder::{ConnectionConfig, TransportConfig};
use dlms_application::association::AssociationEventListener;
use dlms_application::{ClientAssociation, Conformance};
use dlms_core::{DlmsError, DlmsResult};
use dlms_session::iec21::mode_e_handshake;
use dlms_session::{HdlcSession, SessionKind, SessionLayer, WrapperSession};
use dlms_transport::{
    SerialSettings, SerialTransport, StreamAccessor, TcpSettings, TcpTransport, TransportLayer, UdpSettings,
    UdpTransport,
};
use log::{debug, info, warn};
use std::sync::Arc;

/// Connection state
///
/// Tracks the current state of a DLMS/COSEM connection to ensure
/// operations are only performed when the connection is in the correct state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is closed (initial state)
    Closed,
    /// Session layer is established, the association is being negotiated
    SessionOpen,
    /// Association is established, connection is fully ready
    Ready,
}

impl ConnectionState {
    /// Check if the connection is ready for operations
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Check if the connection can be closed
    pub fn can_close(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }
}

/// A client connection built by [`ConnectionBuilder`](super::ConnectionBuilder)
pub struct DlmsConnection {
    config: ConnectionConfig,
    state: ConnectionState,
    session: Option<Box<dyn SessionLayer>>,
    association: Option<ClientAssociation>,
    listeners: Vec<Arc<dyn AssociationEventListener>>,
}

impl std::fmt::Debug for DlmsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlmsConnection")
            .field("transport", &self.config.transport)
            .field("session", &self.config.session)
            .field("state", &self.state)
            .finish()
    }
}

impl DlmsConnection {
    pub(crate) fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Closed,
            session: None,
            association: None,
            listeners: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Register a listener for the events of every association this
    /// connection opens
    pub fn add_listener(&mut self, listener: Arc<dyn AssociationEventListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.is_ready()
    }

    pub fn negotiated_conformance(&self) -> Option<Conformance> {
        self.association.as_ref()?.negotiated_conformance()
    }

    pub fn negotiated_max_pdu_size(&self) -> Option<u16> {
        self.association.as_ref()?.negotiated_max_pdu_size()
    }

    pub fn server_system_title(&self) -> Option<&[u8]> {
        self.association.as_ref()?.server_system_title()
    }

    /// Open transport, session and association, including HLS pass 3/4
    ///
    /// # Errors
    /// Transport and framing errors, `AssociationRejected` when the server
    /// refuses the AARQ and `AuthenticationFailed` when HLS fails. No layer
    /// is left open on error.
    pub async fn open(&mut self) -> DlmsResult<()> {
        if self.state.can_close() {
            return Err(DlmsError::InvalidData("Connection is already open".to_string()));
        }
        let session = self.open_session().await?;
        self.session = Some(session);
        self.state = ConnectionState::SessionOpen;

        match self.associate().await {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                info!(
                    "Association with logical device {} established as client {}",
                    self.config.logical_device_id, self.config.client_id
                );
                Ok(())
            }
            Err(e) => {
                warn!("Association failed: {}", e);
                if let Some(association) = self.association.as_mut() {
                    association.abort(&e.to_string());
                }
                self.shutdown_session().await;
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> DlmsResult<Box<dyn SessionLayer>> {
        match &self.config.transport {
            TransportConfig::Tcp(address) => {
                let mut transport = TcpTransport::new(TcpSettings::new(*address));
                transport.open().await?;
                self.start_session(transport).await
            }
            TransportConfig::Udp(address) => {
                let mut transport = UdpTransport::new(UdpSettings::new(*address));
                transport.open().await?;
                self.start_session(transport).await
            }
            TransportConfig::Serial {
                port_name,
                baud_rate,
                mode_e,
            } => {
                let settings = match mode_e {
                    Some(_) => SerialSettings::iec_62056_21(port_name.as_str()),
                    None => SerialSettings::new(port_name.as_str(), *baud_rate),
                };
                let mut transport = SerialTransport::new(settings);
                transport.open().await?;
                if let Some(device_address) = mode_e {
                    mode_e_handshake(&mut transport, device_address).await?;
                }
                self.start_session(transport).await
            }
        }
    }

    async fn start_session<T>(&self, transport: T) -> DlmsResult<Box<dyn SessionLayer>>
    where
        T: StreamAccessor + 'static,
    {
        let config = &self.config;
        match config.session {
            SessionKind::Wrapper => Ok(Box::new(WrapperSession::client(
                transport,
                config.client_id,
                config.logical_device_id,
            ))),
            SessionKind::Hdlc => {
                let link = config
                    .hdlc
                    .ok_or_else(|| DlmsError::Configuration("HDLC link settings missing".to_string()))?;
                let connect = HdlcSession::connect(transport, link.client, link.server, link.parameters);
                let session = match config.timeout {
                    Some(limit) => tokio::time::timeout(limit, connect)
                        .await
                        .map_err(|_| DlmsError::Timeout)??,
                    None => connect.await?,
                };
                Ok(Box::new(session))
            }
        }
    }

    async fn associate(&mut self) -> DlmsResult<()> {
        let mut association = ClientAssociation::new(self.config.association.clone())?;
        for listener in &self.listeners {
            association.add_listener(listener.clone());
        }
        let aarq = association.build_aarq()?;
        self.association = Some(association);

        let aare = self.exchange(&aarq).await?;
        let association = self.association_mut()?;
        association.process_aare(&aare)?;

        if association.needs_hls() {
            let request = association.build_hls_request()?;
            debug!("Sending HLS pass 3");
            let response = self.exchange(&request).await?;
            self.association_mut()?.process_hls_response(&response)?;
        }
        Ok(())
    }

    /// Send one xDLMS request and wait for its response
    ///
    /// The request is ciphered and the response deciphered when the
    /// association uses a ciphered context.
    pub async fn send_request(&mut self, request: &[u8]) -> DlmsResult<Vec<u8>> {
        if !self.state.is_ready() {
            return Err(DlmsError::InvalidData("Connection is not open".to_string()));
        }
        let sealed = self.association_mut()?.seal_request(request.to_vec())?;
        let response = self.exchange(&sealed).await?;
        self.association_mut()?.open_response(&response)
    }

    /// Release the association with RLRQ/RLRE, then close the session
    pub async fn release(&mut self) -> DlmsResult<()> {
        if !self.state.is_ready() {
            return Err(DlmsError::InvalidData("Connection is not open".to_string()));
        }
        let rlrq = self.association_mut()?.build_rlrq()?;
        let result = match self.exchange(&rlrq).await {
            Ok(rlre) => self.association_mut().and_then(|a| a.process_rlre(&rlre)),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if let Some(association) = self.association.as_mut() {
                association.abort(&e.to_string());
            }
        }
        self.shutdown_session().await;
        result
    }

    /// Close without releasing; the server sees the association aborted
    pub async fn close(&mut self) -> DlmsResult<()> {
        if let Some(association) = self.association.as_mut() {
            association.close();
        }
        let result = match self.session.as_mut() {
            Some(session) => session.close().await,
            None => Ok(()),
        };
        self.session = None;
        self.state = ConnectionState::Closed;
        result
    }

    async fn shutdown_session(&mut self) {
        if let Err(e) = self.close().await {
            debug!("Session close failed: {}", e);
        }
    }

    async fn exchange(&mut self, pdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let timeout = self.config.timeout;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DlmsError::InvalidData("Session is not open".to_string()))?;
        session.send(pdu).await?;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, session.receive())
                .await
                .map_err(|_| DlmsError::Timeout)?,
            None => session.receive().await,
        }
    }

    fn association_mut(&mut self) -> DlmsResult<&mut ClientAssociation> {
        self.association
            .as_mut()
            .ok_or_else(|| DlmsError::InvalidData("No association".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::ConnectionBuilder;
    use super::*;
    use dlms_application::LogicalDevice;
    use dlms_security::{AuthenticationMechanism, EncryptionMechanism, SecuritySuite};
    use dlms_server::{ServerConfig, ServerListener, SessionProtocol};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn hls_suite(mechanism: AuthenticationMechanism, ciphered: bool) -> SecuritySuite {
        let mut builder = SecuritySuite::builder()
            .set_authentication_mechanism(mechanism)
            .set_authentication_key(vec![0x5A; 16])
            .set_global_unicast_encryption_key(vec![0x42; 16]);
        if ciphered {
            builder = builder
                .set_encryption_mechanism(EncryptionMechanism::AesGcm128)
                .set_use_dedicated_key(true);
        }
        builder.build().unwrap()
    }

    async fn start_server(session: SessionProtocol) -> Arc<ServerListener> {
        let mut device = LogicalDevice::new(1, "meter", "ABC", 1)
            .unwrap()
            .with_conformance(Conformance::GET | Conformance::SET | Conformance::ACTION)
            .with_max_pdu_size(1024);
        device.add_restriction(0x10, SecuritySuite::none()).unwrap();
        device.add_restriction(0x11, SecuritySuite::low(b"secret".to_vec())).unwrap();
        device
            .add_restriction(0x12, hls_suite(AuthenticationMechanism::HlsSha256, false))
            .unwrap();
        device
            .add_restriction(0x13, hls_suite(AuthenticationMechanism::HlsGmac, true))
            .unwrap();

        let config = ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            session,
            ..ServerConfig::default()
        };
        let listener = Arc::new(ServerListener::bind(config, vec![device]).await.unwrap());
        tokio::spawn({
            let listener = listener.clone();
            async move { listener.serve().await }
        });
        listener
    }

    fn builder(listener: &ServerListener) -> ConnectionBuilder {
        ConnectionBuilder::new()
            .tcp(&listener.local_addr().to_string())
            .timeout(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_low_wrapper_round_trip() {
        let server = start_server(SessionProtocol::Wrapper).await;
        let mut conn = builder(&server)
            .wrapper_ids(0x11, 0x01)
            .security(SecuritySuite::low(b"secret".to_vec()))
            .build()
            .unwrap();
        conn.open().await.unwrap();
        assert!(conn.is_open());
        assert_eq!(
            conn.negotiated_conformance(),
            Some(Conformance::GET | Conformance::SET | Conformance::ACTION)
        );
        assert_eq!(conn.negotiated_max_pdu_size(), Some(1024));

        let response = conn.send_request(&[0xC0, 0x01, 0xC1, 0x00, 0x08]).await.unwrap();
        assert_eq!(response, vec![0xD8, 0x02, 0x02]);

        conn.release().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let server = start_server(SessionProtocol::Wrapper).await;
        let mut conn = builder(&server)
            .wrapper_ids(0x11, 0x01)
            .security(SecuritySuite::low(b"guess".to_vec()))
            .build()
            .unwrap();
        let err = conn.open().await.unwrap_err();
        assert!(matches!(err, DlmsError::AssociationRejected { result: 1, diagnostic: 13 }));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.send_request(&[0xC0]).await.is_err());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_hls_sha256_over_hdlc() {
        let server = start_server(SessionProtocol::Hdlc).await;
        let mut conn = builder(&server)
            .hdlc_addresses(0x12, 0x01)
            .security(hls_suite(AuthenticationMechanism::HlsSha256, false))
            .build()
            .unwrap();
        conn.open().await.unwrap();
        let response = conn.send_request(&[0xC0, 0x01, 0xC1, 0x00, 0x08]).await.unwrap();
        assert_eq!(response, vec![0xD8, 0x02, 0x02]);
        conn.release().await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_ciphered_gmac_association() {
        let server = start_server(SessionProtocol::Wrapper).await;
        let mut conn = builder(&server)
            .wrapper_ids(0x13, 0x01)
            .security(hls_suite(AuthenticationMechanism::HlsGmac, true))
            .system_title(b"CLI00001")
            .build()
            .unwrap();
        conn.open().await.unwrap();
        assert_eq!(conn.server_system_title().map(<[u8]>::len), Some(8));
        assert!(conn.send_request(&[0xC0, 0x01, 0xC1, 0x00, 0x08]).await.is_ok());
        conn.release().await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_open_twice_and_closed_operations() {
        let server = start_server(SessionProtocol::Wrapper).await;
        let mut conn = builder(&server).build().unwrap();
        assert!(conn.release().await.is_err());
        conn.open().await.unwrap();
        assert!(conn.open().await.is_err());
        conn.close().await.unwrap();
        assert!(!conn.is_open());
        server.shutdown();
    }
}

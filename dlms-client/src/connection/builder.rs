//! Connection builder for DLMS/COSEM client
//!
//! This module provides a builder pattern for creating DLMS/COSEM connections.
//! The builder allows flexible configuration of transport, session, and application layers.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use dlms_client::ConnectionBuilder;
//! use dlms_security::SecuritySuite;
//!
//! # async fn run() -> dlms_core::DlmsResult<()> {
//! // Wrapper over TCP, public client to the management logical device
//! let mut conn = ConnectionBuilder::new()
//!     .tcp("192.168.1.100:4059")
//!     .wrapper_ids(0x10, 0x01)
//!     .build()?;
//! conn.open().await?;
//!
//! // HDLC over an RS-485 line with LLS
//! let mut conn = ConnectionBuilder::new()
//!     .serial("/dev/ttyUSB0", 9600)
//!     .hdlc_addresses(0x11, 0x01)
//!     .security(SecuritySuite::low(b"12345678".to_vec()))
//!     .build()?;
//! conn.open().await?;
//! # Ok(())
//! # }
//! ```

use super::connection::DlmsConnection;
use dlms_application::initiate::{DEFAULT_MAX_PDU_SIZE, MIN_PDU_SIZE};
use dlms_application::{ClientAssociation, ClientAssociationSettings, Conformance};
use dlms_core::{DlmsError, DlmsResult};
use dlms_security::SecuritySuite;
use dlms_session::hdlc::parameters::{DEFAULT_MAX_INFORMATION_LENGTH, DEFAULT_WINDOW_SIZE};
use dlms_session::hdlc::reserved;
use dlms_session::{HdlcAddress, HdlcParameters, SessionKind};
use std::net::SocketAddr;
use std::time::Duration;

/// Default time to wait for one response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection builder for creating DLMS/COSEM connections
///
/// # Configuration Flow
/// 1. Create builder with `ConnectionBuilder::new()`
/// 2. Configure transport (TCP, UDP or Serial)
/// 3. Configure session layer (HDLC addresses or Wrapper IDs)
/// 4. Configure security and application layer (suite, conformance, PDU size)
/// 5. Build with `build()`, which validates the whole configuration
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    transport_type: TransportType,
    /// Session layer; defaults to Wrapper on IP and HDLC on serial lines
    session: Option<SessionKind>,
    client_id: u16,
    logical_device_id: u16,
    physical_address: Option<u16>,
    hdlc_max_info_length: u16,
    hdlc_window_size: u8,
    security_suite: SecuritySuite,
    system_title: Option<Vec<u8>>,
    conformance: Option<Conformance>,
    short_name: bool,
    max_pdu_size: u16,
    timeout: Option<Duration>,
}

/// Transport type configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportType {
    Tcp {
        address: String,
    },
    Udp {
        address: String,
    },
    Serial {
        port_name: String,
        baud_rate: u32,
        /// Device address for the IEC 62056-21 mode E opening, if used
        mode_e: Option<String>,
    },
    /// Not configured
    None,
}

/// Validated transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportConfig {
    Tcp(SocketAddr),
    Udp(SocketAddr),
    Serial {
        port_name: String,
        baud_rate: u32,
        mode_e: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HdlcLink {
    pub client: HdlcAddress,
    pub server: HdlcAddress,
    pub parameters: HdlcParameters,
}

/// Everything `DlmsConnection::open` needs, checked by the builder
#[derive(Debug, Clone)]
pub(crate) struct ConnectionConfig {
    pub transport: TransportConfig,
    pub session: SessionKind,
    pub client_id: u16,
    pub logical_device_id: u16,
    /// Present only for HDLC sessions
    pub hdlc: Option<HdlcLink>,
    pub association: ClientAssociationSettings,
    pub timeout: Option<Duration>,
}

impl ConnectionBuilder {
    /// Create a new connection builder with default settings
    ///
    /// # Default Settings
    /// - Public client (0x10) to the management logical device (0x01)
    /// - No security, logical name referencing
    /// - Max PDU size: 65535 bytes
    /// - Response timeout: 30 seconds
    pub fn new() -> Self {
        Self {
            transport_type: TransportType::None,
            session: None,
            client_id: reserved::CLIENT_PUBLIC_CLIENT,
            logical_device_id: reserved::SERVER_MANAGEMENT_LOGICAL_DEVICE,
            physical_address: None,
            hdlc_max_info_length: DEFAULT_MAX_INFORMATION_LENGTH,
            hdlc_window_size: DEFAULT_WINDOW_SIZE,
            security_suite: SecuritySuite::none(),
            system_title: None,
            conformance: None,
            short_name: false,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
        }
    }

    /// Configure TCP transport
    ///
    /// # Arguments
    /// * `address` - TCP address in format "host:port" (e.g., "192.168.1.100:4059")
    pub fn tcp(mut self, address: &str) -> Self {
        self.transport_type = TransportType::Tcp {
            address: address.to_string(),
        };
        self
    }

    /// Configure UDP transport; only the Wrapper session runs over UDP
    pub fn udp(mut self, address: &str) -> Self {
        self.transport_type = TransportType::Udp {
            address: address.to_string(),
        };
        self
    }

    /// Configure Serial transport
    ///
    /// # Arguments
    /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0" or "COM1")
    /// * `baud_rate` - Baud rate (e.g., 9600, 115200)
    pub fn serial(mut self, port_name: &str, baud_rate: u32) -> Self {
        self.transport_type = TransportType::Serial {
            port_name: port_name.to_string(),
            baud_rate,
            mode_e: None,
        };
        self
    }

    /// Serial transport opened through an optical probe with IEC 62056-21 mode E
    ///
    /// The port starts at 300 baud 7E1 and switches to the speed the meter
    /// offers before HDLC starts. `device_address` may be empty.
    pub fn optical(mut self, port_name: &str, device_address: &str) -> Self {
        self.transport_type = TransportType::Serial {
            port_name: port_name.to_string(),
            baud_rate: 300,
            mode_e: Some(device_address.to_string()),
        };
        self
    }

    /// Use HDLC with the given client and server logical addresses
    ///
    /// Typical values: client=0x10 (public), server=0x01 (management).
    pub fn hdlc_addresses(mut self, client: u16, server: u16) -> Self {
        self.session = Some(SessionKind::Hdlc);
        self.client_id = client;
        self.logical_device_id = server;
        self
    }

    /// Lower HDLC server address of the physical device
    pub fn hdlc_physical_address(mut self, physical: u16) -> Self {
        self.physical_address = Some(physical);
        self
    }

    /// HDLC receive information field length and window proposed in SNRM
    pub fn hdlc_parameters(mut self, max_info_length: u16, window_size: u8) -> Self {
        self.hdlc_max_info_length = max_info_length;
        self.hdlc_window_size = window_size;
        self
    }

    /// Use the Wrapper session with the given ports
    ///
    /// # Arguments
    /// * `client_id` - Client ID (typically 0x10)
    /// * `logical_device_id` - Logical device ID (typically 0x01)
    pub fn wrapper_ids(mut self, client_id: u16, logical_device_id: u16) -> Self {
        self.session = Some(SessionKind::Wrapper);
        self.client_id = client_id;
        self.logical_device_id = logical_device_id;
        self
    }

    pub fn security(mut self, suite: SecuritySuite) -> Self {
        self.security_suite = suite;
        self
    }

    /// Client system title, required for ciphering and HLS-GMAC
    pub fn system_title(mut self, system_title: &[u8]) -> Self {
        self.system_title = Some(system_title.to_vec());
        self
    }

    /// Conformance bits proposed in the InitiateRequest
    pub fn conformance(mut self, conformance: Conformance) -> Self {
        self.conformance = Some(conformance);
        self
    }

    /// Reference objects by short name
    pub fn short_name(mut self) -> Self {
        self.short_name = true;
        self
    }

    /// Largest APDU the client accepts; the server may lower it
    pub fn max_pdu_size(mut self, size: u16) -> Self {
        self.max_pdu_size = size;
        self
    }

    /// Time to wait for each response; `None` waits forever
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration and create an unopened connection
    ///
    /// # Errors
    /// `Configuration` if:
    /// - no transport is configured or its address does not parse
    /// - the session layer cannot run on the transport (HDLC over UDP,
    ///   Wrapper over serial)
    /// - addresses, HDLC parameters or the PDU size are out of range
    /// - the security suite needs a system title that is missing
    pub fn build(self) -> DlmsResult<DlmsConnection> {
        let transport = match self.transport_type {
            TransportType::None => {
                return Err(DlmsError::Configuration(
                    "Transport type must be configured (TCP, UDP or Serial)".to_string(),
                ));
            }
            TransportType::Tcp { address } => TransportConfig::Tcp(parse_address(&address)?),
            TransportType::Udp { address } => TransportConfig::Udp(parse_address(&address)?),
            TransportType::Serial {
                port_name,
                baud_rate,
                mode_e,
            } => TransportConfig::Serial {
                port_name,
                baud_rate,
                mode_e,
            },
        };

        let session = self.session.unwrap_or(match transport {
            TransportConfig::Serial { .. } => SessionKind::Hdlc,
            _ => SessionKind::Wrapper,
        });
        match (&transport, session) {
            (TransportConfig::Udp(_), SessionKind::Hdlc) => {
                return Err(DlmsError::Configuration("HDLC does not run over UDP".to_string()));
            }
            (TransportConfig::Serial { .. }, SessionKind::Wrapper) => {
                return Err(DlmsError::Configuration(
                    "The Wrapper session needs a TCP or UDP transport".to_string(),
                ));
            }
            _ => {}
        }

        if self.max_pdu_size < MIN_PDU_SIZE {
            return Err(DlmsError::Configuration(format!(
                "max_pdu_size {} is below the minimum of {}",
                self.max_pdu_size, MIN_PDU_SIZE
            )));
        }

        let hdlc = match session {
            SessionKind::Hdlc => Some(HdlcLink {
                client: HdlcAddress::new(self.client_id)?,
                server: match self.physical_address {
                    Some(physical) => HdlcAddress::with_lower(self.logical_device_id, physical)?,
                    None => HdlcAddress::new(self.logical_device_id)?,
                },
                parameters: HdlcParameters::symmetric(self.hdlc_max_info_length, self.hdlc_window_size)?,
            }),
            SessionKind::Wrapper => None,
        };

        let mut association = ClientAssociationSettings::new(self.security_suite);
        if self.short_name {
            association = association.with_short_name();
        }
        if let Some(conformance) = self.conformance {
            association = association.with_conformance(conformance);
        }
        if let Some(title) = self.system_title {
            association = association.with_system_title(title);
        }
        association = association.with_max_receive_pdu_size(self.max_pdu_size);
        // surfaces a missing or malformed system title now instead of at open
        ClientAssociation::new(association.clone())?;

        Ok(DlmsConnection::new(ConnectionConfig {
            transport,
            session,
            client_id: self.client_id,
            logical_device_id: self.logical_device_id,
            hdlc,
            association,
            timeout: self.timeout,
        }))
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_address(address: &str) -> DlmsResult<SocketAddr> {
    address
        .parse()
        .map_err(|e| DlmsError::Configuration(format!("Invalid address {}: {}", address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_security::{AuthenticationMechanism, EncryptionMechanism};

    #[test]
    fn test_transport_required() {
        assert!(matches!(
            ConnectionBuilder::new().build(),
            Err(DlmsError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_session_per_transport() {
        let tcp = ConnectionBuilder::new().tcp("127.0.0.1:4059").build().unwrap();
        assert_eq!(tcp.config().session, SessionKind::Wrapper);
        assert_eq!(tcp.config().client_id, 0x10);
        assert_eq!(tcp.config().logical_device_id, 0x01);

        let serial = ConnectionBuilder::new().serial("/dev/ttyUSB0", 9600).build().unwrap();
        assert_eq!(serial.config().session, SessionKind::Hdlc);
        assert!(serial.config().hdlc.is_some());
    }

    #[test]
    fn test_wrapper_ports_use_full_range() {
        let conn = ConnectionBuilder::new()
            .tcp("127.0.0.1:4059")
            .wrapper_ids(0x0100, 0x0200)
            .build()
            .unwrap();
        assert_eq!(conn.config().client_id, 0x0100);
        assert!(conn.config().hdlc.is_none());
    }

    #[test]
    fn test_incompatible_session_rejected() {
        let udp_hdlc = ConnectionBuilder::new()
            .udp("127.0.0.1:4059")
            .hdlc_addresses(0x10, 0x01)
            .build();
        assert!(matches!(udp_hdlc, Err(DlmsError::Configuration(_))));

        let serial_wrapper = ConnectionBuilder::new()
            .serial("/dev/ttyUSB0", 9600)
            .wrapper_ids(0x10, 0x01)
            .build();
        assert!(matches!(serial_wrapper, Err(DlmsError::Configuration(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ConnectionBuilder::new().tcp("not an address").build().is_err());
        assert!(ConnectionBuilder::new().tcp("127.0.0.1:4059").max_pdu_size(8).build().is_err());
        assert!(ConnectionBuilder::new()
            .serial("/dev/ttyUSB0", 9600)
            .hdlc_addresses(0x4000, 0x01)
            .build()
            .is_err());
        assert!(ConnectionBuilder::new()
            .serial("/dev/ttyUSB0", 9600)
            .hdlc_parameters(0, 1)
            .build()
            .is_err());
    }

    #[test]
    fn test_ciphered_suite_needs_system_title() {
        let suite = SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::HlsGmac)
            .set_authentication_key(vec![0x01; 16])
            .set_global_unicast_encryption_key(vec![0x02; 16])
            .set_encryption_mechanism(EncryptionMechanism::AesGcm128)
            .build()
            .unwrap();
        let builder = ConnectionBuilder::new().tcp("127.0.0.1:4059").security(suite);
        assert!(matches!(
            builder.clone().build(),
            Err(DlmsError::Configuration(_))
        ));
        let conn = builder.system_title(b"CLI00001").build().unwrap();
        assert_eq!(conn.config().association.system_title.as_deref(), Some(&b"CLI00001"[..]));
    }

    #[test]
    fn test_hdlc_addresses() {
        let conn = ConnectionBuilder::new()
            .optical("/dev/ttyUSB0", "")
            .hdlc_addresses(0x11, 0x01)
            .hdlc_physical_address(0x21)
            .short_name()
            .build()
            .unwrap();
        let config = conn.config();
        let link = config.hdlc.unwrap();
        assert_eq!(link.client.upper(), 0x11);
        assert_eq!(link.server.upper(), 0x01);
        assert_eq!(link.server.lower(), Some(0x21));
        assert!(!config.association.logical_name);
        assert!(matches!(
            &config.transport,
            TransportConfig::Serial { baud_rate: 300, mode_e: Some(_), .. }
        ));
    }
}
